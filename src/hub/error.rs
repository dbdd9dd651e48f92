//! Errors raised while establishing a hub connection.

/// Errors that can occur while connecting to the hub.
///
/// The connection loop never surfaces these to callers; it uses
/// [`HubError::is_fatal`] to decide between reconnecting and settling in
/// the disconnected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// No bearer token was available.
    MissingToken,
    /// The server refused the token (HTTP status, typically 401 or 403).
    Unauthorized(u16),
    /// The negotiate round-trip failed.
    Negotiation(String),
    /// The server did not offer a WebSocket transport.
    TransportUnavailable,
    /// The protocol handshake failed or timed out.
    Handshake(String),
    /// Socket-level failure (DNS, TCP, TLS, upgrade).
    Transport(String),
}

impl HubError {
    /// Whether retrying cannot help (bad or missing credentials, no
    /// WebSocket support on the server).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::Unauthorized(_) | Self::TransportUnavailable
        )
    }

    /// Classify an HTTP status from negotiation or the upgrade response.
    #[must_use]
    pub fn from_status(status: u16, context: &str) -> Self {
        if status == 401 || status == 403 {
            Self::Unauthorized(status)
        } else {
            Self::Negotiation(format!("{context}: HTTP {status}"))
        }
    }
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "No session token"),
            Self::Unauthorized(status) => write!(f, "Token rejected (HTTP {status})"),
            Self::Negotiation(msg) => write!(f, "Negotiation failed: {msg}"),
            Self::TransportUnavailable => write!(f, "Server does not offer WebSockets"),
            Self::Handshake(msg) => write!(f, "Handshake failed: {msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
        }
    }
}

impl std::error::Error for HubError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HubError::MissingToken.is_fatal());
        assert!(HubError::Unauthorized(401).is_fatal());
        assert!(HubError::TransportUnavailable.is_fatal());
        assert!(!HubError::Negotiation("x".into()).is_fatal());
        assert!(!HubError::Handshake("x".into()).is_fatal());
        assert!(!HubError::Transport("x".into()).is_fatal());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(HubError::from_status(401, "negotiate"), HubError::Unauthorized(401));
        assert_eq!(HubError::from_status(403, "negotiate"), HubError::Unauthorized(403));
        assert_eq!(
            HubError::from_status(502, "negotiate"),
            HubError::Negotiation("negotiate: HTTP 502".into())
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            HubError::Unauthorized(401).to_string(),
            "Token rejected (HTTP 401)"
        );
        assert_eq!(HubError::MissingToken.to_string(), "No session token");
    }
}
