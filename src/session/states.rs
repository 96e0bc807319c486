//! Session stages and the per-frame step result, generalized from the
//! teacher's `state_machine::common::{StateMachine, Transition}` /
//! `login_states::LoginStates` step-driven design: an async multi-round
//! login sequence becomes a synchronous per-frame session stage machine,
//! driven one event at a time by the I/O loop rather than awaited in a
//! loop.

use std::time::Duration;

use crate::cfg::config::Timeouts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Protocol,
    Identify,
    Verify,
    Normal,
    Cleanup,
    Closed,
}

impl SessionState {
    /// The bounded timeout for this stage, per §4.H ("each state has a
    /// bounded timeout; exceeding it forces transition to `cleanup`").
    /// `Normal` uses the idle timeout, reset on any traffic; `Cleanup`/
    /// `Closed` have none, since they're resolved synchronously.
    pub fn timeout(self, timeouts: &Timeouts) -> Option<Duration> {
        match self {
            SessionState::Protocol => Some(timeouts.probe),
            SessionState::Identify | SessionState::Verify => Some(timeouts.handshake),
            SessionState::Normal => Some(timeouts.idle),
            SessionState::Cleanup | SessionState::Closed => None,
        }
    }

    /// A quit is only observable to other users once the session reached
    /// `Normal` and was announced there — losing the connection earlier
    /// never broadcasts a quit, per §4.H.
    pub fn should_broadcast_quit(self) -> bool {
        matches!(self, SessionState::Normal)
    }
}

/// Step result for a single processed frame, mirroring the shape of the
/// teacher's `Transition<S, R>` (`Next`/`Stay`/`Done`) without the
/// `Future` wrapper: `Next` advances the stage, `Stay` keeps it, `Done`
/// means the session is headed to `cleanup`/`closed`.
#[derive(Debug)]
pub enum Transition<R> {
    Next(SessionState, R),
    Stay(R),
    Done(R),
}

/// Whether `command` (the full 4-char token, e.g. `"BINF"`) is acceptable
/// for a session currently in `state`. This is the protocol-violation
/// gate applied before a frame is handed to the handshake or router.
pub fn is_frame_allowed(state: SessionState, command: &str) -> bool {
    match state {
        SessionState::Protocol => command == "HSUP",
        SessionState::Identify | SessionState::Verify => command == "BINF",
        SessionState::Normal => is_routable_client_command(command),
        SessionState::Cleanup | SessionState::Closed => false,
    }
}

/// `C`/`I` contexts are server-originated only and never accepted from a
/// client (§4.J); `B`/`D`/`E`/`F`/`H`/`U` are routable once `Normal`.
fn is_routable_client_command(command: &str) -> bool {
    matches!(command.chars().next(), Some('B' | 'D' | 'E' | 'F' | 'H' | 'U'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_stage_only_accepts_hsup() {
        assert!(is_frame_allowed(SessionState::Protocol, "HSUP"));
        assert!(!is_frame_allowed(SessionState::Protocol, "BINF"));
    }

    #[test]
    fn normal_stage_rejects_server_only_contexts() {
        assert!(is_frame_allowed(SessionState::Normal, "BMSG"));
        assert!(!is_frame_allowed(SessionState::Normal, "CSTA"));
        assert!(!is_frame_allowed(SessionState::Normal, "ISID"));
    }

    #[test]
    fn cleanup_and_closed_accept_nothing() {
        assert!(!is_frame_allowed(SessionState::Cleanup, "BMSG"));
        assert!(!is_frame_allowed(SessionState::Closed, "BMSG"));
    }

    #[test]
    fn quit_is_only_broadcast_from_normal() {
        assert!(SessionState::Normal.should_broadcast_quit());
        assert!(!SessionState::Identify.should_broadcast_quit());
        assert!(!SessionState::Verify.should_broadcast_quit());
    }
}
