//! Sync Transport Error Types
//!
//! One error enum for every failure the transport can observe. Each variant
//! belongs to exactly one [`ErrorClass`], and the class alone decides how the
//! failure propagates:
//!
//! - **Transport**: the connection is torn down and the reconnect policy runs.
//! - **Protocol**: the single offending message is logged and dropped.
//! - **Application**: converted to an outbound `error` envelope at the
//!   dispatch boundary, never reaching the connection state machine.

use std::net::SocketAddr;
use thiserror::Error;

/// Propagation class of a [`NetworkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Protocol,
    Application,
    Configuration,
}

/// Main sync transport error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// TCP handshake did not complete within the connect deadline
    #[error("Connect to {address} timed out after {timeout_ms}ms")]
    ConnectTimeout { address: String, timeout_ms: u64 },

    /// Connect attempt abandoned because the client was disconnected
    #[error("Connect to {address} cancelled")]
    ConnectCancelled { address: String },

    /// Handshake actively refused, or the address could not be resolved
    #[error("Connect to {address} failed: {message}")]
    ConnectFailed {
        address: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Mid-session write failure
    #[error("Send failed: {message}")]
    SendFailed {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Mid-session read failure
    #[error("Receive failed: {message}")]
    ReceiveFailed {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Peer closed or reset the connection
    #[error("Connection reset by peer (remote: {remote_addr:?})")]
    PeerReset { remote_addr: Option<SocketAddr> },

    /// Socket accepted fewer bytes than the frame length
    #[error("Partial send: {sent} of {expected} bytes written")]
    PartialSend { sent: usize, expected: usize },

    /// Consecutive heartbeat failures reached the configured maximum
    #[error("Heartbeat failed {failures} consecutive times")]
    HeartbeatThreshold { failures: u32 },

    /// No live socket to send on
    #[error("Not connected")]
    NotConnected,

    /// Malformed candidate message, missing discriminator, unrecoverable sticky span
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Command the collaborator does not support
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    /// Collaborator handler failed while processing a dispatched command
    #[error("Handler for {command} failed: {code}: {message}")]
    Handler {
        command: String,
        code: String,
        message: String,
    },

    /// Invalid client configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for sync transport operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Create a connect timeout error
    pub fn connect_timeout(address: impl Into<String>, timeout_ms: u64) -> Self {
        Self::ConnectTimeout {
            address: address.into(),
            timeout_ms,
        }
    }

    /// Create a connect cancelled error
    pub fn connect_cancelled(address: impl Into<String>) -> Self {
        Self::ConnectCancelled {
            address: address.into(),
        }
    }

    /// Create a connect error with source
    pub fn connect_failed(
        address: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectFailed {
            address: address.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a send error
    pub fn send(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a send error with source
    pub fn send_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SendFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a receive error with source
    pub fn receive_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ReceiveFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a peer reset error
    pub fn peer_reset(remote_addr: Option<SocketAddr>) -> Self {
        Self::PeerReset { remote_addr }
    }

    /// Create a partial send error
    pub fn partial_send(sent: usize, expected: usize) -> Self {
        Self::PartialSend { sent, expected }
    }

    /// Create a heartbeat threshold error
    pub fn heartbeat_threshold(failures: u32) -> Self {
        Self::HeartbeatThreshold { failures }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unknown command error
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Create a handler error
    pub fn handler(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Handler {
            command: command.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Propagation class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            NetworkError::ConnectTimeout { .. }
            | NetworkError::ConnectCancelled { .. }
            | NetworkError::ConnectFailed { .. }
            | NetworkError::SendFailed { .. }
            | NetworkError::ReceiveFailed { .. }
            | NetworkError::PeerReset { .. }
            | NetworkError::PartialSend { .. }
            | NetworkError::HeartbeatThreshold { .. }
            | NetworkError::NotConnected
            | NetworkError::Io { .. } => ErrorClass::Transport,
            NetworkError::Protocol { .. } => ErrorClass::Protocol,
            NetworkError::UnknownCommand { .. } | NetworkError::Handler { .. } => {
                ErrorClass::Application
            }
            NetworkError::Configuration { .. } => ErrorClass::Configuration,
        }
    }

    /// True when this error must run the connection failure handler
    pub fn is_connection_failure(&self) -> bool {
        self.class() == ErrorClass::Transport
    }

    /// Stable error code carried in outbound `error` envelopes
    pub fn code(&self) -> &str {
        match self {
            NetworkError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            NetworkError::ConnectCancelled { .. } => "CONNECT_CANCELLED",
            NetworkError::ConnectFailed { .. } => "CONNECT_FAILED",
            NetworkError::SendFailed { .. } => "SEND_FAILED",
            NetworkError::ReceiveFailed { .. } => "RECEIVE_FAILED",
            NetworkError::PeerReset { .. } => "PEER_RESET",
            NetworkError::PartialSend { .. } => "PARTIAL_SEND",
            NetworkError::HeartbeatThreshold { .. } => "HEARTBEAT_THRESHOLD",
            NetworkError::NotConnected => "NOT_CONNECTED",
            NetworkError::Protocol { .. } => "PROTOCOL_ERROR",
            NetworkError::UnknownCommand { .. } => "UNKNOWN_COMMAND",
            NetworkError::Handler { code, .. } => code,
            NetworkError::Configuration { .. } => "CONFIGURATION_ERROR",
            NetworkError::Io { .. } => "IO_ERROR",
        }
    }
}

// Box<dyn Error> is not Clone, so sources are dropped
impl Clone for NetworkError {
    fn clone(&self) -> Self {
        match self {
            NetworkError::ConnectTimeout {
                address,
                timeout_ms,
            } => NetworkError::ConnectTimeout {
                address: address.clone(),
                timeout_ms: *timeout_ms,
            },
            NetworkError::ConnectCancelled { address } => NetworkError::ConnectCancelled {
                address: address.clone(),
            },
            NetworkError::ConnectFailed {
                address, message, ..
            } => NetworkError::ConnectFailed {
                address: address.clone(),
                message: message.clone(),
                source: None,
            },
            NetworkError::SendFailed { message, .. } => NetworkError::SendFailed {
                message: message.clone(),
                source: None,
            },
            NetworkError::ReceiveFailed { message, .. } => NetworkError::ReceiveFailed {
                message: message.clone(),
                source: None,
            },
            NetworkError::PeerReset { remote_addr } => NetworkError::PeerReset {
                remote_addr: *remote_addr,
            },
            NetworkError::PartialSend { sent, expected } => NetworkError::PartialSend {
                sent: *sent,
                expected: *expected,
            },
            NetworkError::HeartbeatThreshold { failures } => NetworkError::HeartbeatThreshold {
                failures: *failures,
            },
            NetworkError::NotConnected => NetworkError::NotConnected,
            NetworkError::Protocol { message, .. } => NetworkError::Protocol {
                message: message.clone(),
                source: None,
            },
            NetworkError::UnknownCommand { command } => NetworkError::UnknownCommand {
                command: command.clone(),
            },
            NetworkError::Handler {
                command,
                code,
                message,
            } => NetworkError::Handler {
                command: command.clone(),
                code: code.clone(),
                message: message.clone(),
            },
            NetworkError::Configuration { message, field } => NetworkError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            NetworkError::Io { message, source } => NetworkError::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), message.as_str()),
            },
        }
    }
}

/// Convert standard I/O errors to transport errors
impl From<std::io::Error> for NetworkError {
    fn from(error: std::io::Error) -> Self {
        NetworkError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

/// Convert JSON errors to protocol errors
impl From<serde_json::Error> for NetworkError {
    fn from(error: serde_json::Error) -> Self {
        NetworkError::protocol_with_source("JSON serialization failed", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            NetworkError::connect_timeout("10.0.0.1:8888", 3000).class(),
            ErrorClass::Transport
        );
        assert_eq!(NetworkError::partial_send(3, 10).class(), ErrorClass::Transport);
        assert_eq!(
            NetworkError::connect_cancelled("10.0.0.1:8888").code(),
            "CONNECT_CANCELLED"
        );
        assert_eq!(NetworkError::protocol("bad").class(), ErrorClass::Protocol);
        assert_eq!(
            NetworkError::unknown_command("reboot").class(),
            ErrorClass::Application
        );
        assert_eq!(
            NetworkError::configuration("empty", Some("device_name")).class(),
            ErrorClass::Configuration
        );
    }

    #[test]
    fn test_only_transport_errors_fail_the_connection() {
        assert!(NetworkError::peer_reset(None).is_connection_failure());
        assert!(NetworkError::heartbeat_threshold(5).is_connection_failure());
        assert!(!NetworkError::protocol("not-json").is_connection_failure());
        assert!(!NetworkError::handler("open_all_lockers", "BOARD_OFFLINE", "no board")
            .is_connection_failure());
    }

    #[test]
    fn test_handler_code_passthrough() {
        let err = NetworkError::handler("open_single_locker", "LOCKER_JAMMED", "door stuck");
        assert_eq!(err.code(), "LOCKER_JAMMED");
        assert_eq!(NetworkError::NotConnected.code(), "NOT_CONNECTED");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = NetworkError::from(io_err);

        match err.clone() {
            NetworkError::Io { message, source } => {
                assert!(message.contains("reset"));
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionReset);
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_json_error_is_protocol() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(NetworkError::from(json_err).class(), ErrorClass::Protocol);
    }
}
