//! Session lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ProtocolError;

/// Lifecycle of one producer or consumer session.
///
/// ```text
/// Disconnected -> Connecting -> AwaitingPortmap -> Connected -> SettingUp -> Ready
///                          \______________________/                         |
///                               (direct connection)            any state -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingPortmap,
    Connected,
    SettingUp,
    Ready,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, AwaitingPortmap)
                | (Connecting, Connected)
                | (AwaitingPortmap, Connected)
                | (Connected, SettingUp)
                | (SettingUp, Ready)
        ) || (next == Closed && self != Closed)
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: SessionState) -> Result<(), ProtocolError> {
        if !self.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition { from: self.to_string(), to: next.to_string() });
        }
        debug!(from = %self, to = %next, "Session state change");
        *self = next;
        Ok(())
    }

    /// Close unless already closed.
    pub fn close(&mut self) {
        if *self != SessionState::Closed {
            debug!(from = %self, "Session closed");
            *self = SessionState::Closed;
        }
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingPortmap => "awaiting port map",
            SessionState::Connected => "connected",
            SessionState::SettingUp => "setting up",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendezvous_path_is_accepted() {
        let mut state = SessionState::default();
        for next in [
            SessionState::Connecting,
            SessionState::AwaitingPortmap,
            SessionState::Connected,
            SessionState::SettingUp,
            SessionState::Ready,
            SessionState::Closed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.is_closed());
    }

    #[test]
    fn skipping_setup_is_rejected() {
        let mut state = SessionState::Connected;
        let err = state.transition(SessionState::Ready).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidTransition { from: "connected".into(), to: "ready".into() }
        );
        assert_eq!(state, SessionState::Connected);
    }

    #[test]
    fn closed_is_terminal() {
        let mut state = SessionState::Closed;
        assert!(state.transition(SessionState::Closed).is_err());
        assert!(state.transition(SessionState::Connecting).is_err());
        state.close();
        assert!(state.is_closed());
    }
}
