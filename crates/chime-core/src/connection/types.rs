use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle of the single real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Legal edges of the state machine. Teardown (`-> Disconnected`) is
    /// allowed from anywhere.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// What listeners receive from the connection manager, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// Connected again after an earlier session; frames may have been missed.
    Resumed,
    /// One inbound text frame, unparsed.
    Frame(String),
    /// Consecutive failures reached the configured ceiling.
    Offline { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed by remote")]
    Closed,

    #[error("Not connected")]
    NotConnected,

    #[error("Too many listeners (max {max})")]
    TooManyListeners { max: usize },

    #[error("Connection manager has been shut down")]
    ShutDown,
}

/// Outbound envelope, `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Reconnecting));
    }

    #[test]
    fn test_teardown_from_anywhere() {
        for state in [Disconnected, Connecting, Connected, Reconnecting] {
            assert!(state.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Reconnecting.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Reconnecting));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(Connected.to_string(), "connected");
    }
}
