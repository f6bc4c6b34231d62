//! Socket state machine

use crate::{Error, Result};

/// Gateway socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// TCP connect and TLS handshake in progress
    Connecting,

    /// Handshake complete
    Connected,

    /// Closed (by the caller or after a failure)
    Closed,
}

impl SocketState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: SocketState) -> bool {
        use SocketState::*;

        matches!(
            (self, next),
            (Connecting, Connected) | (Connecting, Closed) | (Connected, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: SocketState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
