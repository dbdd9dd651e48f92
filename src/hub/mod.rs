//! Real-time hub connection.
//!
//! A [`RealtimeConnection`] owns one logical connection to a backend hub
//! (SignalR JSON protocol over WebSocket) and a background task that runs
//! it: negotiate, connect, handshake, route events, keep alive, reconnect.
//!
//! # Architecture
//!
//! ```text
//!   RealtimeConnection            Subscription ("ReceiveMessage")
//!         │                              │
//!         │  subscribe(event)            │  recv() → Vec<Value>
//!         │ ──────────────────────────►  │  (drop = unsubscribe)
//!         │                              │
//!         │  invoke(target, args)        │
//!         ▼                              │
//!   Background task ─── registry ────────┘
//!   (negotiate, handshake, route, ping, reconnect)
//! ```
//!
//! Delivery is at-most-once: events that arrive while nobody is subscribed,
//! or while the connection is down, are gone.

pub mod connection;
mod error;
pub mod negotiate;
pub mod protocol;
pub mod reconnect;

pub use connection::{HubInvoker, HubOptions, RealtimeConnection, Subscription};
pub use error::HubError;
pub use reconnect::ReconnectPolicy;

/// Observable state of a [`RealtimeConnection`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected. Terminal once the background task has stopped.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Handshake completed; events are flowing.
    Connected,
    /// Connection lost; waiting before the next attempt.
    Reconnecting {
        /// Current reconnection attempt number (1-based).
        attempt: u32,
        /// Milliseconds until this attempt starts.
        next_retry_ms: u64,
    },
}

impl ConnectionState {
    /// Returns `true` while events can flow.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting {
                attempt,
                next_retry_ms,
            } => write!(f, "reconnecting (attempt {attempt}, in {next_retry_ms}ms)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
        assert!(ConnectionState::Connected.is_connected());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(
            ConnectionState::Reconnecting {
                attempt: 2,
                next_retry_ms: 2000
            }
            .to_string(),
            "reconnecting (attempt 2, in 2000ms)"
        );
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
