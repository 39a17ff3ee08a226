//! Sync Transport Metrics
//!
//! Lock-free counters shared by the receive loop, the heartbeat task, the
//! send path and the lifecycle code. Cloning a [`SyncMetrics`] shares the
//! same counters.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for one sync client
#[derive(Clone)]
pub struct SyncMetrics {
    connections: Arc<AtomicU64>,
    disconnections: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    messages_sent: Arc<AtomicU64>,
    messages_received: Arc<AtomicU64>,
    heartbeats: Arc<AtomicU64>,
    heartbeat_failures: Arc<AtomicU64>,
    protocol_errors: Arc<AtomicU64>,
    duplicates_suppressed: Arc<AtomicU64>,

    /// Connection failures by error code
    failure_types: Arc<RwLock<HashMap<String, u64>>>,

    last_send: Arc<RwLock<Option<Instant>>>,
    last_receive: Arc<RwLock<Option<Instant>>>,
    last_connected: Arc<RwLock<Option<DateTime<Utc>>>>,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatistics {
    pub connections: u64,
    pub disconnections: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub heartbeats: u64,
    pub heartbeat_failures: u64,
    pub protocol_errors: u64,
    pub duplicates_suppressed: u64,
    pub failure_types: HashMap<String, u64>,
    pub last_connected: Option<DateTime<Utc>>,
    /// Reconnect attempts made in the current outage
    pub reconnect_attempts: u32,
    #[serde(skip)]
    pub last_activity: Option<Instant>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(AtomicU64::new(0)),
            disconnections: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_received: Arc::new(AtomicU64::new(0)),
            heartbeats: Arc::new(AtomicU64::new(0)),
            heartbeat_failures: Arc::new(AtomicU64::new(0)),
            protocol_errors: Arc::new(AtomicU64::new(0)),
            duplicates_suppressed: Arc::new(AtomicU64::new(0)),
            failure_types: Arc::new(RwLock::new(HashMap::new())),
            last_send: Arc::new(RwLock::new(None)),
            last_receive: Arc::new(RwLock::new(None)),
            last_connected: Arc::new(RwLock::new(None)),
        }
    }

    #[inline]
    pub fn record_connected(&self) {
        self.connections.fetch_add(1, Ordering::Release);
        *self.last_connected.write() = Some(Utc::now());
    }

    #[inline]
    pub fn record_disconnected(&self) {
        self.disconnections.fetch_add(1, Ordering::Release);
    }

    /// One frame fully written
    #[inline]
    pub fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Release);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Release);
        *self.last_send.write() = Some(Instant::now());
    }

    /// One socket read
    #[inline]
    pub fn record_read(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Release);
        *self.last_receive.write() = Some(Instant::now());
    }

    /// One envelope handed to the dispatcher
    #[inline]
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Release);
    }

    /// Count a connection failure under its error code
    pub fn record_failure_type(&self, code: &str) {
        *self.failure_types.write().entry(code.to_string()).or_insert(0) += 1;
    }

    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        *self.last_connected.read()
    }

    pub fn snapshot(&self) -> SyncStatistics {
        SyncStatistics {
            connections: self.connections.load(Ordering::Acquire),
            disconnections: self.disconnections.load(Ordering::Acquire),
            bytes_sent: self.bytes_sent.load(Ordering::Acquire),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            messages_sent: self.messages_sent.load(Ordering::Acquire),
            messages_received: self.messages_received.load(Ordering::Acquire),
            heartbeats: self.heartbeats.load(Ordering::Acquire),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Acquire),
            protocol_errors: self.protocol_errors.load(Ordering::Acquire),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Acquire),
            failure_types: self.failure_types.read().clone(),
            last_connected: self.last_connected(),
            reconnect_attempts: 0,
            last_activity: self.last_activity(),
        }
    }

    fn last_activity(&self) -> Option<Instant> {
        let last_send = *self.last_send.read();
        let last_recv = *self.last_receive.read();

        match (last_send, last_recv) {
            (Some(s), Some(r)) => Some(s.max(r)),
            (s, r) => s.or(r),
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
