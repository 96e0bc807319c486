//! Per-connection session state: the login handshake, the stage machine
//! that gates which frames a session may send, and the disconnect-reason
//! vocabulary used to report why a session was torn down.

pub mod disconnect;
pub mod handshake;
pub mod states;

pub use disconnect::DisconnectReason;
pub use states::{is_frame_allowed, SessionState, Transition};
