//! Kiosk Sync Transport
//!
//! Device-side TCP client that keeps a kiosk synchronized with its
//! management server. Messages are newline-delimited JSON envelopes.
//!
//! ## Layout
//!
//! - [`protocol`]: envelope codec, frame assembly with sticky-packet recovery,
//!   duplicate suppression
//! - [`client`]: connection state machine, reconnect loop, session tasks
//! - [`heartbeat`]: liveness probing and failure counting
//! - [`dispatcher`]: routes inbound envelopes by `messageType`
//! - [`commands`]: server commands and the collaborator handler seam
//! - [`events`]: what collaborators observe
//!
//! ```no_run
//! use kiosk_network::{ClientConfig, SyncClient, SyncEvent};
//!
//! # async fn run() -> kiosk_network::Result<()> {
//! let client = SyncClient::new(ClientConfig::new("10.0.0.5", 8888))?;
//! let mut events = client.subscribe();
//! client.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SyncEvent::DataReceived(data) = event {
//!         println!("{} -> {}", data.message_type, data.data_type);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod protocol;

pub use client::SyncClient;
pub use commands::{Command, CommandError, CommandHandler, CommandKind, IgnoreCommands};
pub use config::ClientConfig;
pub use dispatcher::{MessageDispatcher, Route};
pub use error::{ErrorClass, NetworkError, Result};
pub use events::{
    CommandReceived, ConnectionState, ConnectionStatusChanged, DataReceived, SyncEvent,
};
pub use heartbeat::{HeartbeatMonitor, HeartbeatOutcome, HeartbeatProbe};
pub use metrics::{SyncMetrics, SyncStatistics};
pub use protocol::{DedupCache, Envelope, EnvelopeCodec, FrameAssembler, InboundPipeline};

/// Protocol version stamped on outbound envelopes
pub const PROTOCOL_VERSION: &str = "1.0";

/// Bytes requested per socket read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Digests remembered before the dedup cache is cleared
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;
