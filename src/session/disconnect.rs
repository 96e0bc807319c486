//! Disconnect reasons: the closed vocabulary reported via `IQUI`/`ISTA`
//! before a session moves to `cleanup`, grounded on the teacher's
//! `RejectReason`/`LogoutResponseCode` style (a `thiserror` enum with a
//! stable numeric code and a `Display` impl used verbatim on the wire).

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    #[error("protocol violation")]
    ProtocolViolation,
    #[error("hub is full")]
    HubFull,
    #[error("address is banned")]
    Banned,
    #[error("insufficient credentials")]
    InsufficientCredentials,
    #[error("nick already in use")]
    DuplicateNick,
    #[error("CID already in use")]
    DuplicateCid,
    #[error("too many connections from this address")]
    TooManyConnections,
    #[error("send buffer overflow")]
    SendBufferOverflow,
    #[error("receive buffer overflow")]
    RecvBufferOverflow,
    #[error("TLS error")]
    TlsError,
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("idle timeout")]
    IdleTimeout,
    #[error("denied by policy plugin")]
    PolicyDenied,
    #[error("client quit")]
    ClientQuit,
    #[error("hub is shutting down")]
    HubShutdown,
}

impl DisconnectReason {
    /// Stable machine-readable code, distinguishing the taxonomy buckets
    /// from §7 (admission 1xxx, quota 2xxx, protocol 3xxx, TLS/internal
    /// 4xxx/5xxx).
    pub fn code(self) -> u16 {
        match self {
            DisconnectReason::HubFull => 1000,
            DisconnectReason::Banned => 1001,
            DisconnectReason::InsufficientCredentials => 1002,
            DisconnectReason::DuplicateNick => 1003,
            DisconnectReason::DuplicateCid => 1004,
            DisconnectReason::SendBufferOverflow => 2000,
            DisconnectReason::RecvBufferOverflow => 2001,
            DisconnectReason::ProtocolViolation => 3000,
            DisconnectReason::HandshakeTimeout => 3001,
            DisconnectReason::IdleTimeout => 3002,
            DisconnectReason::PolicyDenied => 3003,
            DisconnectReason::TlsError => 4000,
            DisconnectReason::ClientQuit => 5000,
            DisconnectReason::HubShutdown => 5001,
        }
    }

    /// Whether this reason originates from the admission checks run
    /// between `verify` and `normal` (§4.H) — these get `IQUI` with an
    /// optional redirect address rather than a plain `ISTA`.
    pub fn is_admission_failure(self) -> bool {
        matches!(
            self,
            DisconnectReason::HubFull
                | DisconnectReason::Banned
                | DisconnectReason::InsufficientCredentials
                | DisconnectReason::DuplicateNick
                | DisconnectReason::DuplicateCid
        )
    }

    /// Renders the `IQUI AAAB <code> <text>` frame sent to the client
    /// immediately before closing, with an optional redirect address
    /// appended as an `RD` field.
    pub fn to_iqui_frame(self, sid_text: &str, redirect: Option<&str>) -> String {
        match redirect {
            Some(addr) => format!("IQUI {sid_text} TO{} RD{addr}\n", self.code()),
            None => format!("IQUI {sid_text} TO{}\n", self.code()),
        }
    }
}
