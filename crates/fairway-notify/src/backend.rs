//! SQLite-backed stores.
//!
//! Every row written is published to the [`ChangeFeed`] after commit, so
//! engines for all participants (including other sessions of the writer)
//! see the change as a push event.

use std::sync::Arc;

use async_trait::async_trait;
use fairway_db::queries::{friend_requests, notifications};
use fairway_db::DbError;
use fairway_realtime::{ChangeFeed, RowChange};
use fairway_types::events::Operation;
use fairway_types::friends::{FriendRequest, FriendRequestStatus};
use fairway_types::notifications::{Notification, NotificationKind};
use fairway_types::{FriendRequestId, NotificationId, UserId};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{FriendRequestStore, NotificationStore, StoreError, StoreResult};

#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
    feed: ChangeFeed,
}

impl SqliteBackend {
    pub fn new(conn: Connection, feed: ChangeFeed) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            feed,
        }
    }

    /// Backend over a fresh in-memory database.
    pub fn open_memory(feed: ChangeFeed) -> Result<Self, DbError> {
        Ok(Self::new(fairway_db::open_memory()?, feed))
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Propose a friendship. Creates the pending request and the receiver's
    /// `friend_request` notification together.
    pub async fn send_friend_request(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
    ) -> StoreResult<FriendRequest> {
        let db = self.db.lock().await;
        let (request, notification) = friend_requests::create_with_notification(
            &db,
            sender_id,
            receiver_id,
            fairway_types::now_millis(),
        )?;
        self.emit(RowChange::friend_request(Operation::Insert, &request));
        self.emit(RowChange::notification(Operation::Insert, &notification));
        info!(request = %request.id, sender = %sender_id, receiver = %receiver_id, "friend request sent");
        Ok(request)
    }

    /// Requests waiting on `user_id`'s answer, newest first.
    pub async fn pending_requests(&self, user_id: &UserId) -> StoreResult<Vec<FriendRequest>> {
        let db = self.db.lock().await;
        Ok(friend_requests::list_incoming_pending(&db, user_id)?)
    }

    /// Counterparts of every accepted request involving `user_id`.
    pub async fn friends(&self, user_id: &UserId) -> StoreResult<Vec<UserId>> {
        let db = self.db.lock().await;
        Ok(friend_requests::list_friends(&db, user_id)?)
    }

    fn emit(&self, change: fairway_realtime::Result<RowChange>) {
        match change {
            Ok(change) => self.feed.publish(change),
            Err(e) => warn!(error = %e, "failed to encode row change"),
        }
    }
}

#[async_trait]
impl NotificationStore for SqliteBackend {
    async fn fetch_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        let db = self.db.lock().await;
        Ok(notifications::list_for_user(&db, user_id, limit)?)
    }

    async fn update_notification(&self, id: &NotificationId, read: bool) -> StoreResult<()> {
        let db = self.db.lock().await;
        let updated = notifications::set_read(&db, id, read)?;
        self.emit(RowChange::notification(Operation::Update, &updated));
        Ok(())
    }

    async fn delete_notification(&self, id: &NotificationId) -> StoreResult<()> {
        let db = self.db.lock().await;
        match notifications::delete(&db, id)? {
            Some(deleted) => self.emit(RowChange::notification(Operation::Delete, &deleted)),
            None => debug!(notification = %id, "delete of absent notification"),
        }
        Ok(())
    }
}

#[async_trait]
impl FriendRequestStore for SqliteBackend {
    async fn update_friend_request_status(
        &self,
        id: &FriendRequestId,
        new_status: FriendRequestStatus,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        let transition =
            friend_requests::transition(&db, id, new_status, fairway_types::now_millis())?;

        self.emit(RowChange::friend_request(Operation::Update, &transition.request));
        if let Some(accepted) = &transition.accepted_notification {
            self.emit(RowChange::notification(Operation::Insert, accepted));
        }
        for n in &transition.marked_read {
            self.emit(RowChange::notification(Operation::Update, n));
        }
        Ok(())
    }

    async fn fetch_friend_request(&self, id: &FriendRequestId) -> StoreResult<FriendRequest> {
        let db = self.db.lock().await;
        Ok(friend_requests::get(&db, id)?)
    }

    async fn create_friend_accepted_notification(
        &self,
        for_user_id: &UserId,
        request_id: &FriendRequestId,
    ) -> StoreResult<Notification> {
        let db = self.db.lock().await;
        let request = friend_requests::get(&db, request_id)?;
        if request.sender_id != *for_user_id {
            return Err(StoreError::Constraint(format!(
                "friend_accepted for request {request_id} belongs to its sender"
            )));
        }
        let notification = notifications::create(
            &db,
            for_user_id,
            NotificationKind::FriendAccepted,
            request_id,
            &request.receiver_id,
            fairway_types::now_millis(),
        )?;
        self.emit(RowChange::notification(Operation::Insert, &notification));
        Ok(notification)
    }
}
