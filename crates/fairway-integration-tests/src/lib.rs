//! Integration test harness for the Fairway notification subsystem.
//!
//! The tests under `tests/` drive full flows (friend requests, multi-device
//! races, failure recovery) across the db, realtime and notify crates
//! against an in-memory SQLite backend.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p fairway-integration-tests
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fairway_notify::backend::SqliteBackend;
use fairway_notify::store::StoreResult;
use fairway_notify::{
    EngineConfig, FriendRequestStore, NotificationEngine, NotificationStore, SessionRegistry,
    Store, StoreError,
};
use fairway_realtime::ChangeFeed;
use fairway_types::friends::{FriendRequest, FriendRequestStatus};
use fairway_types::notifications::{Notification, ViewSnapshot};
use fairway_types::{FriendRequestId, NotificationId, UserId};

/// How long a test waits for a pushed change before giving up.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// A backend, its change feed, and a session registry over a
/// [`FaultyStore`].
pub struct Harness {
    pub backend: SqliteBackend,
    pub faults: Arc<FaultyStore>,
    pub sessions: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::new(256))
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        let backend = SqliteBackend::open_memory(feed.clone()).expect("open backend");
        let faults = Arc::new(FaultyStore::new(backend.clone()));
        let sessions = SessionRegistry::new(
            Arc::clone(&faults) as Arc<dyn Store>,
            feed,
            EngineConfig::default(),
        );
        Self {
            backend,
            faults,
            sessions,
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        self.backend.feed()
    }

    /// An engine for `user_id` outside the registry, e.g. a second device.
    pub fn device(&self, user_id: UserId) -> Arc<NotificationEngine> {
        NotificationEngine::start(
            user_id,
            Arc::clone(&self.faults) as Arc<dyn Store>,
            self.feed(),
            EngineConfig::default(),
        )
    }

    /// A device whose push channel is cut off: it only sees the store.
    pub fn offline_device(&self, user_id: UserId) -> Arc<NotificationEngine> {
        NotificationEngine::start(
            user_id,
            Arc::clone(&self.faults) as Arc<dyn Store>,
            &ChangeFeed::new(16),
            EngineConfig::default(),
        )
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until `engine`'s view satisfies `predicate`, returning that view.
pub async fn wait_for<F>(engine: &NotificationEngine, predicate: F) -> ViewSnapshot
where
    F: Fn(&ViewSnapshot) -> bool,
{
    let mut rx = engine.watch();
    let wait = async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if predicate(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("engine alive");
        }
    };
    tokio::time::timeout(PUSH_TIMEOUT, wait)
        .await
        .expect("view reached expected state in time")
}

/// Let spawned pumps drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Delegates to a [`SqliteBackend`] with switchable failures.
pub struct FaultyStore {
    inner: SqliteBackend,
    fail_fetch: AtomicBool,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
    fail_status: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: SqliteBackend) -> Self {
        Self {
            inner,
            fail_fetch: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
        }
    }

    pub fn fail_fetch(&self, on: bool) {
        self.fail_fetch.store(on, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, on: bool) {
        self.fail_updates.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_status(&self, on: bool) {
        self.fail_status.store(on, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{what}: connection reset")));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for FaultyStore {
    async fn fetch_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        Self::check(&self.fail_fetch, "fetch")?;
        self.inner.fetch_notifications(user_id, limit).await
    }

    async fn update_notification(&self, id: &NotificationId, read: bool) -> StoreResult<()> {
        Self::check(&self.fail_updates, "update")?;
        self.inner.update_notification(id, read).await
    }

    async fn delete_notification(&self, id: &NotificationId) -> StoreResult<()> {
        Self::check(&self.fail_deletes, "delete")?;
        self.inner.delete_notification(id).await
    }
}

#[async_trait]
impl FriendRequestStore for FaultyStore {
    async fn update_friend_request_status(
        &self,
        id: &FriendRequestId,
        new_status: FriendRequestStatus,
    ) -> StoreResult<()> {
        Self::check(&self.fail_status, "status")?;
        self.inner.update_friend_request_status(id, new_status).await
    }

    async fn fetch_friend_request(&self, id: &FriendRequestId) -> StoreResult<FriendRequest> {
        self.inner.fetch_friend_request(id).await
    }

    async fn create_friend_accepted_notification(
        &self,
        for_user_id: &UserId,
        request_id: &FriendRequestId,
    ) -> StoreResult<Notification> {
        self.inner
            .create_friend_accepted_notification(for_user_id, request_id)
            .await
    }
}
