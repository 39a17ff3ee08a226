//! Server Commands
//!
//! Commands are server-originated requests for the device to act (open a
//! locker, upsert a user, run a sync). The dispatcher queues them; a single
//! worker task hands each one to the collaborator's [`CommandHandler`] and
//! sends back either the typed response or an `error` envelope.
//!
//! Handlers run one at a time in arrival order. A handler failure, including
//! a panic, is answered on the wire and never touches the connection.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::protocol::message_types as mt;
use crate::protocol::Envelope;
use crate::{NetworkError, Result};

/// Code sent when a handler panics
pub const HANDLER_PANIC: &str = "HANDLER_PANIC";

/// Code sent when a handler task is cancelled before it answers
pub const HANDLER_CANCELLED: &str = "HANDLER_CANCELLED";

/// Commands the device understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SyncRoles,
    SyncUsers,
    SyncLockers,
    SyncUserLockers,
    CreateAndUpdateUser,
    UserLockerAssignment,
    OpenSingleLocker,
    OpenAllLockers,
    ChangeAdminPassword,
}

impl CommandKind {
    pub const ALL: [CommandKind; 9] = [
        CommandKind::SyncRoles,
        CommandKind::SyncUsers,
        CommandKind::SyncLockers,
        CommandKind::SyncUserLockers,
        CommandKind::CreateAndUpdateUser,
        CommandKind::UserLockerAssignment,
        CommandKind::OpenSingleLocker,
        CommandKind::OpenAllLockers,
        CommandKind::ChangeAdminPassword,
    ];

    pub fn from_message_type(message_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.message_type() == message_type)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            CommandKind::SyncRoles => mt::SYNC_ROLES,
            CommandKind::SyncUsers => mt::SYNC_USERS,
            CommandKind::SyncLockers => mt::SYNC_LOCKERS,
            CommandKind::SyncUserLockers => mt::SYNC_USER_LOCKERS,
            CommandKind::CreateAndUpdateUser => mt::CREATE_AND_UPDATE_USER,
            CommandKind::UserLockerAssignment => mt::USER_LOCKER_ASSIGNMENT,
            CommandKind::OpenSingleLocker => mt::OPEN_SINGLE_LOCKER,
            CommandKind::OpenAllLockers => mt::OPEN_ALL_LOCKERS,
            CommandKind::ChangeAdminPassword => mt::CHANGE_ADMIN_PASSWORD,
        }
    }

    /// `messageType` of the success reply
    pub fn response_type(&self) -> &'static str {
        match self {
            CommandKind::SyncRoles => mt::SYNC_ROLES_RESPONSE,
            CommandKind::SyncUsers => mt::SYNC_USERS_RESPONSE,
            CommandKind::SyncLockers => mt::SYNC_LOCKERS_RESPONSE,
            CommandKind::SyncUserLockers => mt::SYNC_USER_LOCKERS_RESPONSE,
            CommandKind::CreateAndUpdateUser => mt::CREATE_AND_UPDATE_USER_RESPONSE,
            CommandKind::UserLockerAssignment => mt::USER_LOCKER_ASSIGNMENT_RESPONSE,
            CommandKind::OpenSingleLocker => mt::OPEN_LOCKER_RESPONSE,
            CommandKind::OpenAllLockers => mt::OPEN_ALL_RESPONSE,
            CommandKind::ChangeAdminPassword => mt::CHANGE_PASSWORD_RESPONSE,
        }
    }
}

/// One dispatched command
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub envelope: Envelope,
    /// Message text exactly as received
    pub raw: String,
}

impl Command {
    pub fn new(kind: CommandKind, envelope: Envelope, raw: impl Into<String>) -> Self {
        Self {
            kind,
            envelope,
            raw: raw.into(),
        }
    }

    /// The envelope's `data` object
    pub fn parameters(&self) -> &Value {
        self.envelope.data()
    }
}

/// Failure reported by a [`CommandHandler`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

impl CommandError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(kind: CommandKind) -> Self {
        let err = NetworkError::unknown_command(kind.message_type());
        Self::new(err.code(), err.to_string())
    }
}

/// Collaborator that carries out server commands
///
/// `Ok(Some(payload))` sends the command's response envelope with `payload`
/// as `data`. `Ok(None)` sends nothing, for handlers that reply on their own
/// through [`SyncClient`](crate::SyncClient). `Err` sends an `error` envelope.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, command: &Command) -> std::result::Result<Option<Value>, CommandError>;
}

/// Handler that acknowledges nothing
///
/// Used when the collaborator only consumes `CommandReceived` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreCommands;

#[async_trait]
impl CommandHandler for IgnoreCommands {
    async fn handle(&self, command: &Command) -> std::result::Result<Option<Value>, CommandError> {
        debug!(command = command.kind.message_type(), "No command handler installed");
        Ok(None)
    }
}

/// Where command replies go
#[async_trait]
pub trait OutboundSink: Send + Sync + 'static {
    async fn send_message(&self, message_type: &str, data: Value) -> Result<()>;
}

/// Payload of the `error` envelope answering a failed command
pub fn error_payload(command: CommandKind, error: &CommandError) -> Value {
    json!({
        "code": error.code,
        "message": error.message,
        "command": command.message_type(),
    })
}

/// Drain the command queue until it closes or the sink goes away
pub async fn run_command_worker<S>(
    mut queue: mpsc::Receiver<Command>,
    handler: Arc<dyn CommandHandler>,
    sink: Weak<S>,
) where
    S: OutboundSink,
{
    while let Some(command) = queue.recv().await {
        let kind = command.kind;
        let outcome = execute(handler.clone(), command).await;

        let Some(sink) = sink.upgrade() else {
            debug!("Client dropped, stopping command worker");
            break;
        };

        let sent = match outcome {
            Ok(Some(payload)) => sink.send_message(kind.response_type(), payload).await,
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(
                    error = %NetworkError::handler(kind.message_type(), &err.code, &err.message),
                    "Command failed"
                );
                sink.send_message(mt::ERROR, error_payload(kind, &err)).await
            }
        };

        if let Err(e) = sent {
            warn!(error = %e, command = kind.message_type(), "Could not reply to command");
        }
    }

    debug!("Command worker stopped");
}

/// Run one handler call in its own task so a panic becomes a reply
async fn execute(
    handler: Arc<dyn CommandHandler>,
    command: Command,
) -> std::result::Result<Option<Value>, CommandError> {
    let kind = command.kind;
    let task = tokio::spawn(async move { handler.handle(&command).await });

    match task.await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            error!(command = kind.message_type(), "Command handler panicked");
            Err(CommandError::new(
                HANDLER_PANIC,
                format!("Handler for {} panicked", kind.message_type()),
            ))
        }
        Err(_) => Err(CommandError::new(
            HANDLER_CANCELLED,
            format!("Handler for {} was cancelled", kind.message_type()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EnvelopeCodec;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send_message(&self, message_type: &str, data: Value) -> Result<()> {
            self.sent.lock().push((message_type.to_string(), data));
            Ok(())
        }
    }

    struct LockerHandler;

    #[async_trait]
    impl CommandHandler for LockerHandler {
        async fn handle(
            &self,
            command: &Command,
        ) -> std::result::Result<Option<Value>, CommandError> {
            match command.kind {
                CommandKind::OpenSingleLocker => {
                    let locker = command.parameters()["lockerId"].clone();
                    Ok(Some(json!({"lockerId": locker, "opened": true})))
                }
                CommandKind::OpenAllLockers => {
                    Err(CommandError::new("BOARD_OFFLINE", "board 2 not responding"))
                }
                CommandKind::ChangeAdminPassword => panic!("keypad exploded"),
                other => Err(CommandError::unsupported(other)),
            }
        }
    }

    fn command(kind: CommandKind, data: Value) -> Command {
        let envelope = EnvelopeCodec::new("1.0", "server").build(kind.message_type(), data);
        let raw = envelope.to_json().unwrap();
        Command::new(kind, envelope, raw)
    }

    async fn run(commands: Vec<Command>) -> Vec<(String, Value)> {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        for c in commands {
            tx.send(c).await.unwrap();
        }
        drop(tx);

        run_command_worker(rx, Arc::new(LockerHandler), Arc::downgrade(&sink)).await;
        let sent = sink.sent.lock().clone();
        sent
    }

    #[test]
    fn test_response_type_mapping() {
        assert_eq!(CommandKind::OpenSingleLocker.response_type(), "open_locker_response");
        assert_eq!(CommandKind::OpenAllLockers.response_type(), "open_all_response");
        assert_eq!(
            CommandKind::ChangeAdminPassword.response_type(),
            "change_password_response"
        );
        assert_eq!(CommandKind::SyncUsers.response_type(), "sync_users_response");
        assert_eq!(
            CommandKind::CreateAndUpdateUser.response_type(),
            "createAndUpdate_user_response"
        );
    }

    #[test]
    fn test_from_message_type() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_message_type(kind.message_type()), Some(kind));
        }
        assert_eq!(CommandKind::from_message_type("reboot"), None);
        assert_eq!(CommandKind::from_message_type("sync_users_response"), None);
    }

    #[tokio::test]
    async fn test_success_sends_typed_response() {
        let sent = run(vec![command(
            CommandKind::OpenSingleLocker,
            json!({"lockerId": 12}),
        )])
        .await;

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "open_locker_response");
        assert_eq!(sent[0].1, json!({"lockerId": 12, "opened": true}));
    }

    #[tokio::test]
    async fn test_failure_sends_error_envelope() {
        let sent = run(vec![command(CommandKind::OpenAllLockers, json!({}))]).await;

        assert_eq!(sent[0].0, "error");
        assert_eq!(sent[0].1["code"], "BOARD_OFFLINE");
        assert_eq!(sent[0].1["command"], "open_all_lockers");
    }

    #[tokio::test]
    async fn test_panic_is_answered_and_worker_continues() {
        let sent = run(vec![
            command(CommandKind::ChangeAdminPassword, json!({"password": "x"})),
            command(CommandKind::OpenSingleLocker, json!({"lockerId": 1})),
        ])
        .await;

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "error");
        assert_eq!(sent[0].1["code"], HANDLER_PANIC);
        assert_eq!(sent[1].0, "open_locker_response");
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        let sent = run(vec![command(CommandKind::SyncRoles, json!({}))]).await;
        assert_eq!(sent[0].1["code"], "UNKNOWN_COMMAND");
    }

    #[tokio::test]
    async fn test_ignore_commands_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(1);
        tx.send(command(CommandKind::SyncUsers, json!({}))).await.unwrap();
        drop(tx);

        run_command_worker(rx, Arc::new(IgnoreCommands), Arc::downgrade(&sink)).await;
        assert!(sink.sent.lock().is_empty());
    }
}
