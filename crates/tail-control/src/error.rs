//! Error types for the control core
//!
//! Manager operations themselves never fail: lookup misses are no-ops and
//! transport failures only show up as state that did not change. These
//! errors cover talking to the manager actor from the outside.

use thiserror::Error;

/// Errors that can occur when driving the manager actor
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The actor has stopped and no longer accepts commands
    #[error("manager actor is not running")]
    ActorStopped,

    /// The actor dropped a reply channel without answering
    #[error("manager actor dropped the reply for {0}")]
    NoReply(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            ControlError::ActorStopped.to_string(),
            "manager actor is not running"
        );
        assert_eq!(
            ControlError::NoReply("snapshot").to_string(),
            "manager actor dropped the reply for snapshot"
        );
    }
}
