//! Per-connection tasks: the receive loop and the heartbeat loop.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::connection::{heartbeat_payload, ClientInner, OnSendFailure};
use crate::heartbeat::{HeartbeatOutcome, HeartbeatProbe};
use crate::protocol::message_types as mt;
use crate::protocol::{FrameAssembler, InboundPipeline};
use crate::{NetworkError, Result};

/// Read until shutdown, EOF or a socket error
///
/// EOF and read errors are reported as connection failures for `session_id`.
pub(crate) async fn receive_loop(
    inner: Arc<ClientInner>,
    session_id: u64,
    peer: SocketAddr,
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = &inner.config;
    let mut pipeline = InboundPipeline::new(
        FrameAssembler::new(config.read_buffer_size, config.max_buffer_multiple),
        inner.dedup.clone(),
        inner.metrics.clone(),
    );
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!(session_id, peer = %peer, "Server closed the connection");
                inner.report_failure(session_id, NetworkError::peer_reset(Some(peer)));
                break;
            }
            Ok(n) => {
                trace!(session_id, bytes = n, "Read from socket");
                inner.metrics.record_read(n);
                for message in pipeline.ingest(&buf[..n]) {
                    if *shutdown.borrow() {
                        break;
                    }
                    inner.dispatcher.dispatch(message).await;
                }
            }
            Err(e) => {
                inner.report_failure(
                    session_id,
                    NetworkError::receive_with_source("Socket read failed", e),
                );
                break;
            }
        }
    }

    debug!(session_id, "Receive loop stopped");
}

/// Heartbeats for one session
pub(crate) async fn heartbeat_loop(
    inner: Arc<ClientInner>,
    session_id: u64,
    shutdown: watch::Receiver<bool>,
) {
    let probe = SessionProbe {
        inner: inner.clone(),
        session_id,
    };

    match inner.heartbeat.run(&probe, shutdown).await {
        HeartbeatOutcome::ThresholdReached { failures } => {
            inner.report_failure(session_id, NetworkError::heartbeat_threshold(failures));
        }
        HeartbeatOutcome::Stopped => debug!(session_id, "Heartbeat loop stopped"),
    }
}

/// Sends heartbeats on one session's socket only
struct SessionProbe {
    inner: Arc<ClientInner>,
    session_id: u64,
}

#[async_trait]
impl HeartbeatProbe for SessionProbe {
    async fn probe(&self) -> Result<()> {
        let frame = self.inner.codec().frame(mt::HEARTBEAT, heartbeat_payload())?;
        self.inner
            .write_frame(&frame, Some(self.session_id), OnSendFailure::ReturnError)
            .await
    }
}
