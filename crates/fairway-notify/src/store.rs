//! Boundary to the external notification and friend-relationship stores.

use async_trait::async_trait;
use fairway_db::DbError;
use fairway_types::friends::{FriendRequest, FriendRequestStatus};
use fairway_types::notifications::Notification;
use fairway_types::{FriendRequestId, NotificationId, UserId};

/// Errors reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Transport or backend unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A status transition was attempted on a request that is no longer
    /// pending.
    #[error("friend request is already {0}")]
    StaleState(FriendRequestStatus),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transport-level failures are worth retrying; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Backend(_))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Self::NotFound(what),
            DbError::Constraint(what) => Self::Constraint(what),
            DbError::StaleState(status) => Self::StaleState(status),
            DbError::Sqlite(e) => Self::Unavailable(e.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-user notification entries.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Up to `limit` most recent notifications for `user_id`, newest first.
    async fn fetch_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StoreResult<Vec<Notification>>;

    /// Set the read flag. Fails with [`StoreError::NotFound`] if absent.
    async fn update_notification(&self, id: &NotificationId, read: bool) -> StoreResult<()>;

    /// Delete a notification. Absent ids are not an error.
    async fn delete_notification(&self, id: &NotificationId) -> StoreResult<()>;
}

/// Friend-request edges, mutable only through status transitions.
#[async_trait]
pub trait FriendRequestStore: Send + Sync {
    /// Move a pending request to `new_status`. Fails with
    /// [`StoreError::StaleState`] if the request is no longer pending.
    ///
    /// On accept, the sender's `friend_accepted` notification is created
    /// atomically with the status change.
    async fn update_friend_request_status(
        &self,
        id: &FriendRequestId,
        new_status: FriendRequestStatus,
    ) -> StoreResult<()>;

    /// Authoritative current state of a request.
    async fn fetch_friend_request(&self, id: &FriendRequestId) -> StoreResult<FriendRequest>;

    /// Create the `friend_accepted` notification for `for_user_id`. Stores
    /// that do this inside [`Self::update_friend_request_status`] need not
    /// be called separately.
    async fn create_friend_accepted_notification(
        &self,
        for_user_id: &UserId,
        request_id: &FriendRequestId,
    ) -> StoreResult<Notification>;
}

/// Everything the engine talks to.
pub trait Store: NotificationStore + FriendRequestStore {}

impl<T: NotificationStore + FriendRequestStore> Store for T {}
