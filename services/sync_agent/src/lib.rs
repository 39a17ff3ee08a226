//! Kiosk sync agent
//!
//! Runs the sync transport as a standalone process: maps the loaded
//! configuration onto the client, keeps the first connection trying until it
//! succeeds, and logs every event the transport publishes.

use anyhow::{Context, Result};
use kiosk_config::{KioskConfig, LoggingSettings};
use kiosk_network::{ClientConfig, SyncClient, SyncEvent};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transport settings from the agent configuration
pub fn client_config(config: &KioskConfig) -> ClientConfig {
    let sync = &config.sync;
    ClientConfig {
        server_address: config.server.address.clone(),
        port: config.server.port,
        device_name: config.device.name.clone(),
        protocol_version: config.device.protocol_version.clone(),
        connect_timeout: Duration::from_secs(config.server.connect_timeout_secs),
        send_timeout: Duration::from_secs(config.server.send_timeout_secs),
        heartbeat_interval: Duration::from_secs(sync.heartbeat_interval_secs),
        max_heartbeat_failures: sync.max_heartbeat_failures,
        reconnect_enabled: sync.reconnect_enabled,
        reconnect_interval: Duration::from_secs(sync.reconnect_interval_secs),
        max_reconnect_attempts: sync.max_reconnect_attempts,
        read_buffer_size: sync.read_buffer_size,
        max_buffer_multiple: sync.max_buffer_multiple,
        dedup_capacity: sync.dedup_capacity,
        event_capacity: sync.event_capacity,
        command_queue_capacity: sync.command_queue_capacity,
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .with_context(|| format!("Invalid log level {:?}", settings.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if settings.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.context("Failed to install tracing subscriber")
}

pub fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::ConnectionStatusChanged(change) => info!(
            state = %change.state,
            address = %change.address,
            port = change.port,
            "{}",
            change.status
        ),
        SyncEvent::DataReceived(data) => info!(
            message_type = %data.message_type,
            data_type = %data.data_type,
            bytes = data.raw_message.len(),
            "Data received"
        ),
        SyncEvent::CommandReceived(command) => info!(
            command = %command.command,
            source = %command.source,
            parameters = %command.parameters_json,
            "Command received"
        ),
    }
}

/// Run until `shutdown` resolves, then disconnect
///
/// The first connect is retried every reconnect interval; after that the
/// client's own reconnect policy takes over.
pub async fn run<F>(client: SyncClient, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut events = client.subscribe();
    let retry = client.config().reconnect_interval;

    loop {
        match client.connect().await {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, retry_in = ?retry, "Initial connect failed");
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested before connecting");
                        client.disconnect().await;
                        return Ok(());
                    }
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        }
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => {
                    debug!("Event channel closed");
                    break;
                }
            },
        }
    }

    client.disconnect().await;
    info!(statistics = ?client.get_statistics(), "Sync agent stopped");
    Ok(())
}
