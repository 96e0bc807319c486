//! Closed, protocol-visible error vocabularies for ADC message handling.
//!
//! Mirrors the teacher's `models::opcode`/`models::logout::common` style of
//! small `thiserror` enums with a stable numeric code, rather than
//! `anyhow::Error`, because these are errors the caller must match on and
//! report back to the client as an `ISTA` code.

use thiserror::Error;

use crate::identity::Sid;
use crate::proto::escape::UnescapeError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty payload")]
    Empty,
    #[error("frame must contain exactly one LF, as the final byte")]
    BadFraming,
    #[error("embedded NUL byte")]
    EmbeddedNul,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("command token must be exactly 4 characters")]
    BadCommandLength,
    #[error("unknown context character '{0}'")]
    UnknownContext(char),
    #[error("command type must be 3 uppercase letters")]
    BadCommandType,
    #[error("missing source SID for this context")]
    MissingSource,
    #[error("missing target SID for this context")]
    MissingTarget,
    #[error("invalid SID token '{0}'")]
    BadSid(String),
    #[error("invalid argument escaping: {0}")]
    BadEscape(#[from] UnescapeError),
    #[error("source SID {actual} does not match session SID {expected}")]
    SourceMismatch { expected: Sid, actual: Sid },
}

impl ParseError {
    /// Stable `ISTA` status code (`40xx`, per the error-handling taxonomy)
    /// reported back to the sender. Grounded on the teacher's
    /// `RejectReason::as_u8`/`LogoutResponseCode::as_u8` pattern of giving
    /// every closed error vocabulary a wire-stable numeric identity.
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::Empty | ParseError::BadFraming | ParseError::EmbeddedNul => 4000,
            ParseError::InvalidUtf8 => 4001,
            ParseError::BadCommandLength | ParseError::BadCommandType => 4002,
            ParseError::UnknownContext(_) => 4003,
            ParseError::MissingSource | ParseError::MissingTarget | ParseError::BadSid(_) => 4004,
            ParseError::BadEscape(_) => 4005,
            ParseError::SourceMismatch { .. } => 4006,
        }
    }
}
