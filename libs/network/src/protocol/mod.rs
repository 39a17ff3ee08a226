//! Wire Protocol
//!
//! Newline-delimited UTF-8 JSON, one envelope per line. This module holds
//! the envelope codec, the receive-side framing and sticky-packet recovery,
//! duplicate suppression, and the `messageType` vocabulary shared by both
//! directions.

pub mod dedup;
pub mod envelope;
pub mod frame;
pub mod pipeline;

pub use dedup::{DedupCache, MessageDigest};
pub use envelope::{parse_timestamp, Envelope, EnvelopeCodec};
pub use frame::{is_json_object, split_sticky, FrameAssembler};
pub use pipeline::InboundPipeline;

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Known `messageType` values
pub mod message_types {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";
    pub const ERROR: &str = "error";

    pub const REQUEST_BOARDS: &str = "request_boards";
    pub const REQUEST_BOARDS_RESPONSE: &str = "request_boards_response";
    pub const UPLOAD_ACCESS_LOGS: &str = "upload_access_logs";
    pub const ACCESS_LOGS_UPLOAD_RESPONSE: &str = "access_logs_upload_response";

    pub const SYNC_ROLES: &str = "sync_roles";
    pub const SYNC_ROLES_RESPONSE: &str = "sync_roles_response";
    pub const SYNC_USERS: &str = "sync_users";
    pub const SYNC_USERS_RESPONSE: &str = "sync_users_response";
    pub const SYNC_LOCKERS: &str = "sync_lockers";
    pub const SYNC_LOCKERS_RESPONSE: &str = "sync_lockers_response";
    pub const SYNC_USER_LOCKERS: &str = "sync_user_lockers";
    pub const SYNC_USER_LOCKERS_RESPONSE: &str = "sync_user_lockers_response";

    pub const CREATE_AND_UPDATE_USER: &str = "createAndUpdate_user";
    pub const CREATE_AND_UPDATE_USER_RESPONSE: &str = "createAndUpdate_user_response";
    pub const USER_LOCKER_ASSIGNMENT: &str = "user_locker_assignment";
    pub const USER_LOCKER_ASSIGNMENT_RESPONSE: &str = "user_locker_assignment_response";
    pub const OPEN_SINGLE_LOCKER: &str = "open_single_locker";
    pub const OPEN_LOCKER_RESPONSE: &str = "open_locker_response";
    pub const OPEN_ALL_LOCKERS: &str = "open_all_lockers";
    pub const OPEN_ALL_RESPONSE: &str = "open_all_response";
    pub const CHANGE_ADMIN_PASSWORD: &str = "change_admin_password";
    pub const CHANGE_PASSWORD_RESPONSE: &str = "change_password_response";
}
