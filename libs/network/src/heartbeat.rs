//! Heartbeat Monitor
//!
//! Sends a liveness probe every `interval` for as long as one connection
//! lives. A successful probe, or a `heartbeat_response` from the server,
//! resets the consecutive-failure counter; a failed probe increments it.
//! When the counter reaches `max_failures` the run loop returns
//! [`HeartbeatOutcome::ThresholdReached`] and the caller fails the connection.
//!
//! Each probe completes (and the counter is updated) before the next tick is
//! awaited, so the counter always reflects whole probes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::metrics::SyncMetrics;
use crate::Result;

/// Sends one liveness probe
#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Consecutive-failure counter and last success time
#[derive(Debug, Clone, Default)]
pub struct HeartbeatRecord {
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

/// Why [`HeartbeatMonitor::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Shutdown was signalled
    Stopped,
    /// `failures` consecutive probes failed
    ThresholdReached { failures: u32 },
}

#[derive(Clone)]
pub struct HeartbeatMonitor {
    record: Arc<Mutex<HeartbeatRecord>>,
    interval: Duration,
    max_failures: u32,
    metrics: SyncMetrics,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, max_failures: u32, metrics: SyncMetrics) -> Self {
        Self {
            record: Arc::new(Mutex::new(HeartbeatRecord::default())),
            interval,
            max_failures: max_failures.max(1),
            metrics,
        }
    }

    /// Reset the counter after a successful probe or acknowledgment
    pub fn record_success(&self) {
        let mut record = self.record.lock();
        record.consecutive_failures = 0;
        record.last_success = Some(Utc::now());
    }

    /// Count one failure; returns the new consecutive count
    pub fn record_failure(&self) -> u32 {
        let mut record = self.record.lock();
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.consecutive_failures
    }

    /// Clear the counter for a fresh connection
    pub fn reset(&self) {
        self.record.lock().consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.record.lock().consecutive_failures
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.record.lock().last_success
    }

    pub fn record(&self) -> HeartbeatRecord {
        self.record.lock().clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Probe until shutdown or until the failure threshold is reached
    ///
    /// The first probe goes out one full interval after the call.
    pub async fn run<P>(&self, probe: &P, mut shutdown: watch::Receiver<bool>) -> HeartbeatOutcome
    where
        P: HeartbeatProbe + ?Sized,
    {
        if *shutdown.borrow() {
            return HeartbeatOutcome::Stopped;
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return HeartbeatOutcome::Stopped,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => return HeartbeatOutcome::Stopped,
                result = probe.probe() => result,
            };

            match result {
                Ok(()) => {
                    self.metrics.record_heartbeat();
                    self.record_success();
                    debug!("Heartbeat sent");
                }
                Err(e) => {
                    self.metrics.record_heartbeat_failure();
                    let failures = self.record_failure();
                    warn!(
                        error = %e,
                        failures,
                        max_failures = self.max_failures,
                        "Heartbeat failed"
                    );
                    if failures >= self.max_failures {
                        return HeartbeatOutcome::ThresholdReached { failures };
                    }
                }
            }
        }
    }
}
