//! Message Dispatcher
//!
//! Parses each admitted message into an [`Envelope`] and routes it by
//! `messageType`:
//!
//! | messageType                          | effect                                  |
//! |--------------------------------------|-----------------------------------------|
//! | `heartbeat_response`                 | resets the heartbeat failure counter    |
//! | `error`                              | logged, published as `DataReceived`     |
//! | `*_response` to a device request     | published as `DataReceived`             |
//! | server command                       | `CommandReceived`, then queued          |
//! | anything else                        | logged and ignored                      |

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::commands::{Command, CommandKind};
use crate::events::{CommandReceived, DataReceived, SyncEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::SyncMetrics;
use crate::protocol::message_types as mt;
use crate::protocol::pipeline::preview;
use crate::protocol::Envelope;

/// Where a `messageType` goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    HeartbeatAck,
    ServerError,
    Data { data_type: &'static str },
    Command(CommandKind),
    Unrouted,
}

impl Route {
    pub fn for_message_type(message_type: &str) -> Self {
        let data_type = match message_type {
            mt::HEARTBEAT_RESPONSE => return Route::HeartbeatAck,
            mt::ERROR => return Route::ServerError,
            mt::SYNC_ROLES_RESPONSE => "roles",
            mt::SYNC_USERS_RESPONSE => "users",
            mt::SYNC_LOCKERS_RESPONSE => "lockers",
            mt::SYNC_USER_LOCKERS_RESPONSE => "user_lockers",
            mt::REQUEST_BOARDS_RESPONSE => "boards",
            mt::ACCESS_LOGS_UPLOAD_RESPONSE => "access_logs",
            other => {
                return CommandKind::from_message_type(other)
                    .map(Route::Command)
                    .unwrap_or(Route::Unrouted)
            }
        };
        Route::Data { data_type }
    }
}

/// Routes inbound envelopes for one client
pub struct MessageDispatcher {
    heartbeat: HeartbeatMonitor,
    events: broadcast::Sender<SyncEvent>,
    commands: mpsc::Sender<Command>,
    metrics: SyncMetrics,
}

impl MessageDispatcher {
    pub fn new(
        heartbeat: HeartbeatMonitor,
        events: broadcast::Sender<SyncEvent>,
        commands: mpsc::Sender<Command>,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            heartbeat,
            events,
            commands,
            metrics,
        }
    }

    /// Handle one admitted message; never fails the connection
    ///
    /// Waits only when the command queue is full.
    pub async fn dispatch(&self, raw: String) {
        let envelope = match Envelope::parse(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.record_protocol_error();
                warn!(error = %e, preview = %preview(&raw), "Dropping unparseable envelope");
                return;
            }
        };
        self.metrics.record_message();

        match Route::for_message_type(envelope.message_type()) {
            Route::HeartbeatAck => {
                self.heartbeat.record_success();
                debug!("Heartbeat acknowledged");
            }
            Route::ServerError => {
                let data = envelope.data();
                let code = data.get("code").cloned().unwrap_or_default();
                let message = data.get("message").cloned().unwrap_or_default();
                warn!(code = %code, message = %message, "Server reported an error");
                self.publish_data(&envelope, &raw, "error");
            }
            Route::Data { data_type } => {
                debug!(message_type = envelope.message_type(), data_type, "Data received");
                self.publish_data(&envelope, &raw, data_type);
            }
            Route::Command(kind) => self.dispatch_command(kind, envelope, raw).await,
            Route::Unrouted => {
                info!(
                    message_type = envelope.message_type(),
                    "Ignoring unrecognized message type"
                );
            }
        }
    }

    fn publish_data(&self, envelope: &Envelope, raw: &str, data_type: &str) {
        self.publish(SyncEvent::DataReceived(DataReceived {
            raw_message: raw.to_string(),
            data_type: data_type.to_string(),
            message_type: envelope.message_type().to_string(),
            timestamp: Utc::now(),
        }));
    }

    async fn dispatch_command(&self, kind: CommandKind, envelope: Envelope, raw: String) {
        let source = match envelope.device_name() {
            "" => "server".to_string(),
            name => name.to_string(),
        };
        info!(command = kind.message_type(), source = %source, "Command received");

        self.publish(SyncEvent::CommandReceived(CommandReceived {
            command: kind.message_type().to_string(),
            parameters_json: envelope.data().to_string(),
            source,
            original_message: raw.clone(),
            timestamp: Utc::now(),
        }));

        if self
            .commands
            .send(Command::new(kind, envelope, raw))
            .await
            .is_err()
        {
            warn!(command = kind.message_type(), "Command worker is gone, dropping command");
        }
    }

    fn publish(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        dispatcher: MessageDispatcher,
        heartbeat: HeartbeatMonitor,
        events: broadcast::Receiver<SyncEvent>,
        commands: mpsc::Receiver<Command>,
        metrics: SyncMetrics,
    }

    fn harness() -> Harness {
        let metrics = SyncMetrics::new();
        let heartbeat = HeartbeatMonitor::new(Duration::from_secs(30), 5, metrics.clone());
        let (event_tx, events) = broadcast::channel(16);
        let (command_tx, commands) = mpsc::channel(4);
        Harness {
            dispatcher: MessageDispatcher::new(
                heartbeat.clone(),
                event_tx,
                command_tx,
                metrics.clone(),
            ),
            heartbeat,
            events,
            commands,
            metrics,
        }
    }

    #[test]
    fn test_routes() {
        assert_eq!(Route::for_message_type("heartbeat_response"), Route::HeartbeatAck);
        assert_eq!(Route::for_message_type("error"), Route::ServerError);
        assert_eq!(
            Route::for_message_type("sync_user_lockers_response"),
            Route::Data { data_type: "user_lockers" }
        );
        assert_eq!(
            Route::for_message_type("request_boards_response"),
            Route::Data { data_type: "boards" }
        );
        assert_eq!(
            Route::for_message_type("open_single_locker"),
            Route::Command(CommandKind::OpenSingleLocker)
        );
        assert_eq!(Route::for_message_type("firmware_update"), Route::Unrouted);
        assert_eq!(Route::for_message_type("heartbeat"), Route::Unrouted);
    }

    #[tokio::test]
    async fn test_heartbeat_ack_resets_failures() {
        let mut h = harness();
        h.heartbeat.record_failure();
        h.heartbeat.record_failure();

        h.dispatcher
            .dispatch(r#"{"messageType":"heartbeat_response","data":{"status":"ok"}}"#.into())
            .await;

        assert_eq!(h.heartbeat.consecutive_failures(), 0);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sync_response_publishes_data() {
        let mut h = harness();
        let raw = r#"{"messageType":"sync_users_response","data":[{"id":1}]}"#;
        h.dispatcher.dispatch(raw.into()).await;

        match h.events.try_recv().unwrap() {
            SyncEvent::DataReceived(event) => {
                assert_eq!(event.data_type, "users");
                assert_eq!(event.message_type, "sync_users_response");
                assert_eq!(event.raw_message, raw);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_publishes_data() {
        let mut h = harness();
        h.dispatcher
            .dispatch(r#"{"messageType":"error","data":{"code":"E1","message":"bad"}}"#.into())
            .await;

        match h.events.try_recv().unwrap() {
            SyncEvent::DataReceived(event) => assert_eq!(event.data_type, "error"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_is_published_then_queued() {
        let mut h = harness();
        let raw = r#"{"deviceName":"ADMIN-01","messageType":"open_single_locker","data":{"lockerId":4}}"#;
        h.dispatcher.dispatch(raw.into()).await;

        match h.events.try_recv().unwrap() {
            SyncEvent::CommandReceived(event) => {
                assert_eq!(event.command, "open_single_locker");
                assert_eq!(event.source, "ADMIN-01");
                assert_eq!(event.parameters_json, r#"{"lockerId":4}"#);
                assert_eq!(event.original_message, raw);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let command = h.commands.try_recv().unwrap();
        assert_eq!(command.kind, CommandKind::OpenSingleLocker);
        assert_eq!(command.parameters()["lockerId"], 4);
    }

    #[tokio::test]
    async fn test_command_source_defaults_to_server() {
        let mut h = harness();
        h.dispatcher
            .dispatch(r#"{"messageType":"sync_roles","data":{}}"#.into())
            .await;

        match h.events.try_recv().unwrap() {
            SyncEvent::CommandReceived(event) => assert_eq!(event.source, "server"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_envelopes_are_dropped() {
        let mut h = harness();
        h.dispatcher.dispatch(r#"{"data":{}}"#.into()).await;
        h.dispatcher.dispatch(r#"{"messageType":42}"#.into()).await;
        h.dispatcher
            .dispatch(r#"{"messageType":"firmware_update"}"#.into())
            .await;

        assert!(h.events.try_recv().is_err());
        assert!(h.commands.try_recv().is_err());
        let stats = h.metrics.snapshot();
        assert_eq!(stats.protocol_errors, 2);
        assert_eq!(stats.messages_received, 1);
    }
}
