//! Events published to collaborators.
//!
//! The transport is headless; everything a UI or reconciliation layer needs
//! to know arrives as a [`SyncEvent`] on the broadcast channel returned by
//! [`SyncClient::subscribe`](crate::SyncClient::subscribe).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatusChanged {
    pub is_connected: bool,
    pub state: ConnectionState,
    /// Human-readable description of the transition
    pub status: String,
    pub address: String,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
}

/// Data message for the reconciliation layer
#[derive(Debug, Clone, Serialize)]
pub struct DataReceived {
    pub raw_message: String,
    /// Entity family: `users`, `lockers`, `roles`, `error`, ...
    pub data_type: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Server command, emitted before the command handler runs
#[derive(Debug, Clone, Serialize)]
pub struct CommandReceived {
    pub command: String,
    /// The envelope's `data`, as JSON text
    pub parameters_json: String,
    pub source: String,
    pub original_message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub enum SyncEvent {
    ConnectionStatusChanged(ConnectionStatusChanged),
    DataReceived(DataReceived),
    CommandReceived(CommandReceived),
}
