//! # fairway-types
//!
//! Shared domain types for the Fairway friend-request and notification
//! subsystem. Every crate in the workspace speaks in these types; the UI
//! consumes them through the generated TypeScript bindings.

pub mod events;
pub mod friends;
pub mod notifications;

/// Common identifier aliases.
pub type UserId = uuid::Uuid;
pub type FriendRequestId = uuid::Uuid;
pub type NotificationId = uuid::Uuid;

/// Unix epoch milliseconds.
pub type Timestamp = u64;

/// Default number of notifications fetched by a load.
pub const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

/// Errors raised while decoding domain values from their wire/storage form.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("unknown friend request status: {0}")]
    UnknownStatus(String),

    #[error("unknown notification type: {0}")]
    UnknownKind(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

/// Generate a fresh opaque identifier.
pub fn new_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}
