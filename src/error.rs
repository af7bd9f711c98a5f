use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("cannot connect to `{addr}` (connection refused). Is the CAD application running?")]
    ConnectionRefused { addr: String },

    #[error("connection to `{addr}` timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("connection failed for `{addr}`: {reason}")]
    Connection { addr: String, reason: String },

    #[error("transport send failed: {reason}")]
    TransportSend { reason: String },

    #[error("transport receive failed: {reason}")]
    TransportReceive { reason: String },

    #[error("connection closed without response")]
    PeerClosed,

    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("json encode failed: {0}")]
    JsonEncode(String),

    #[error("json decode failed: {0}")]
    JsonDecode(String),

    #[error("websocket error: {reason}")]
    WebSocket { reason: String },

    #[error("not connected to the command server")]
    NotConnected,

    #[error("failed to bind socket server at `{addr}`: {reason}")]
    Bind { addr: String, reason: String },

    #[error("failed to spawn thread `{name}`: {reason}")]
    ThreadSpawn { name: String, reason: String },

    #[error("background thread panicked")]
    ThreadPanic,

    #[error("mutex poisoned")]
    InternalPoisoned,

    #[error("runtime setup failed: {0}")]
    Runtime(String),
}

impl AdapterError {
    /// True for the connection-level failures a reconnect loop can recover from.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::ConnectTimeout { .. }
                | Self::Connection { .. }
                | Self::PeerClosed
                | Self::NotConnected
                | Self::WebSocket { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AdapterError;

    #[test]
    fn refused_message_names_the_address() {
        let err = AdapterError::ConnectionRefused {
            addr: "localhost:9876".to_string(),
        };
        assert!(err.to_string().contains("localhost:9876"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn connection_failures_are_classified() {
        assert!(AdapterError::PeerClosed.is_connection_failure());
        assert!(AdapterError::ConnectTimeout {
            addr: "x:1".to_string(),
            timeout: Duration::from_secs(1),
        }
        .is_connection_failure());
        assert!(!AdapterError::JsonDecode("bad".to_string()).is_connection_failure());
    }
}
