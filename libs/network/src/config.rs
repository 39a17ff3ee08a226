//! Client configuration consumed by the sync transport.

use crate::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or IP address
    pub server_address: String,
    /// Server TCP port
    pub port: u16,
    /// Device name stamped on every outbound envelope
    pub device_name: String,
    /// Protocol version stamped on every outbound envelope
    pub protocol_version: String,
    /// Deadline for the TCP handshake
    pub connect_timeout: Duration,
    /// Deadline for a single outbound write
    pub send_timeout: Duration,
    /// Interval between liveness probes while connected
    pub heartbeat_interval: Duration,
    /// Consecutive heartbeat failures that fail the connection
    pub max_heartbeat_failures: u32,
    /// Whether transport failures start the reconnect loop
    pub reconnect_enabled: bool,
    /// Fixed delay between reconnect attempts
    pub reconnect_interval: Duration,
    /// Reconnect attempts per outage, 0 = unlimited
    pub max_reconnect_attempts: u32,
    /// Size of a single socket read
    pub read_buffer_size: usize,
    /// Receive buffer is cleared once it exceeds `read_buffer_size * max_buffer_multiple`
    pub max_buffer_multiple: usize,
    /// Number of message digests remembered for duplicate suppression
    pub dedup_capacity: usize,
    /// Capacity of the collaborator event channel
    pub event_capacity: usize,
    /// Capacity of the command queue feeding the command handler
    pub command_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            port: 8888,
            device_name: "KIOSK-01".to_string(),
            protocol_version: crate::PROTOCOL_VERSION.to_string(),
            connect_timeout: Duration::from_secs(3),
            send_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_heartbeat_failures: 5,
            reconnect_enabled: true,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 0,
            read_buffer_size: crate::DEFAULT_READ_BUFFER_SIZE,
            max_buffer_multiple: 10,
            dedup_capacity: crate::DEFAULT_DEDUP_CAPACITY,
            event_capacity: 256,
            command_queue_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Config for a server at `address:port`, defaults elsewhere
    pub fn new(server_address: impl Into<String>, port: u16) -> Self {
        Self {
            server_address: server_address.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` string used for connecting and in status events
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.port)
    }

    /// Upper bound on the receive buffer before it is discarded
    pub fn max_buffer_size(&self) -> usize {
        self.read_buffer_size.saturating_mul(self.max_buffer_multiple)
    }

    /// Reject configurations the transport cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server_address.trim().is_empty() {
            return Err(NetworkError::configuration(
                "Server address must not be empty",
                Some("server_address"),
            ));
        }
        if self.port == 0 {
            return Err(NetworkError::configuration("Port must be non-zero", Some("port")));
        }
        if self.device_name.trim().is_empty() {
            return Err(NetworkError::configuration(
                "Device name must not be empty",
                Some("device_name"),
            ));
        }

        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("send_timeout", self.send_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconnect_interval", self.reconnect_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(NetworkError::configuration(
                    format!("{} must be greater than zero", field),
                    Some(field),
                ));
            }
        }

        let sizes = [
            ("max_heartbeat_failures", self.max_heartbeat_failures as usize),
            ("read_buffer_size", self.read_buffer_size),
            ("max_buffer_multiple", self.max_buffer_multiple),
            ("dedup_capacity", self.dedup_capacity),
            ("event_capacity", self.event_capacity),
            ("command_queue_capacity", self.command_queue_capacity),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(NetworkError::configuration(
                    format!("{} must be greater than zero", field),
                    Some(field),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.max_buffer_size(), 8192 * 10);
    }

    #[test]
    fn test_rejects_empty_device_name() {
        let config = ClientConfig {
            device_name: "  ".to_string(),
            ..Default::default()
        };

        match config.validate() {
            Err(NetworkError::Configuration { field, .. }) => {
                assert_eq!(field.as_deref(), Some("device_name"));
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_heartbeat_interval() {
        let config = ClientConfig {
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_format() {
        assert_eq!(ClientConfig::new("sync.local", 9000).endpoint(), "sync.local:9000");
    }
}
