//! The closed status vocabulary the command interpreter reports back,
//! grounded on the teacher's closed-status-enum style (`RejectReason`,
//! `LogoutResponseCode`): a `thiserror` enum whose variants are the
//! caller-facing outcome, not an internal error detail.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    #[error("ok")]
    Ok,
    #[error("syntax error")]
    Syntax,
    #[error("command not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("missing arguments")]
    MissingArgs,
    #[error("expected an integer")]
    BadInteger,
    #[error("no such nick")]
    BadNick,
    #[error("no such CID")]
    BadCid,
    #[error("no such command")]
    BadCommand,
    #[error("unrecognized credential keyword")]
    BadCredentials,
    #[error("malformed address")]
    BadAddress,
    #[error("malformed address range")]
    BadRange,
}
