//! The notification engine.
//!
//! One engine per signed-in user. It owns the reconciled view, a change-feed
//! subscription pumped on a background task, and the per-key locks that
//! serialize mutations on the same notification or request.
//!
//! Every mutation is two-phase: apply to the view, await the store, then
//! confirm or roll back. The view lock is a `std::sync::Mutex` and is never
//! held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use fairway_realtime::{ChangeFeed, ChangeFilter, Delivery, PushEvent, Subscription};
use fairway_types::friends::FriendRequestStatus;
use fairway_types::notifications::ViewSnapshot;
use fairway_types::{FriendRequestId, NotificationId, UserId, DEFAULT_NOTIFICATION_LIMIT};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::friend_request::{self, Response};
use crate::locks::KeyedLocks;
use crate::store::{Store, StoreError};
use crate::view::{Optimistic, ReconciledView};
use crate::{EngineError, Result};

/// Engine tuning, usually read from the daemon's `[notifications]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Notifications fetched by `load(None)`.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Reload when the feed subscription reports dropped events.
    #[serde(default = "default_resync_on_lag")]
    pub resync_on_lag: bool,
}

fn default_page_limit() -> usize {
    DEFAULT_NOTIFICATION_LIMIT
}

fn default_resync_on_lag() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            resync_on_lag: default_resync_on_lag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LockKey {
    Notification(NotificationId),
    Request(FriendRequestId),
}

/// What happened to the view while a load was in flight. The fetch may
/// predate any of it, so it is replayed on top of the fetched rows.
#[derive(Debug, Clone)]
enum Journaled {
    Push(PushEvent),
    Confirmed(Optimistic),
}

struct EngineState {
    view: ReconciledView,
    disposed: bool,
    loads_in_flight: usize,
    journal: Vec<Journaled>,
}

impl EngineState {
    fn confirm(&mut self, change: Optimistic) {
        if self.loads_in_flight > 0 && !change.is_noop() {
            self.journal.push(Journaled::Confirmed(change.clone()));
        }
        self.view.confirm(change);
    }
}

pub struct NotificationEngine {
    user_id: UserId,
    store: Arc<dyn Store>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    updates: watch::Sender<ViewSnapshot>,
    locks: KeyedLocks<LockKey>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationEngine {
    /// Create an engine for `user_id` and subscribe it to `feed`.
    ///
    /// The view starts empty; call [`Self::load`] to populate it. Must be
    /// called from within a tokio runtime.
    pub fn start(
        user_id: UserId,
        store: Arc<dyn Store>,
        feed: &ChangeFeed,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (updates, _) = watch::channel(ViewSnapshot::default());
        let engine = Arc::new(Self {
            user_id,
            store,
            config,
            state: Mutex::new(EngineState {
                view: ReconciledView::new(user_id),
                disposed: false,
                loads_in_flight: 0,
                journal: Vec::new(),
            }),
            updates,
            locks: KeyedLocks::new(),
            pump: Mutex::new(None),
        });

        let subscription = feed.subscribe(ChangeFilter::for_user(user_id));
        let handle = tokio::spawn(pump(Arc::downgrade(&engine), subscription));
        *engine.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(user = %user_id, "notification engine started");
        engine
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Observe view changes. The receiver starts at the current snapshot.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.state().view.snapshot()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// Fetch the newest `limit` notifications (default: the configured page
    /// limit) and replace the view. Returns the number of entries in view.
    ///
    /// On failure the view keeps its previous contents.
    pub async fn load(&self, limit: Option<usize>) -> Result<usize> {
        let limit = limit.unwrap_or(self.config.page_limit);
        {
            let mut state = self.live_state()?;
            state.loads_in_flight += 1;
        }

        let fetched = self.store.fetch_notifications(&self.user_id, limit).await;

        let mut state = self.state();
        state.loads_in_flight -= 1;
        let idle = state.loads_in_flight == 0;
        if state.disposed {
            debug!(user = %self.user_id, "discarding load result after dispose");
            return Ok(0);
        }

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                if idle {
                    state.journal.clear();
                }
                warn!(user = %self.user_id, error = %e, "failed to load notifications");
                return Err(EngineError::Fetch(e));
            }
        };

        let count = fetched.len();
        state.view.replace(fetched);
        let journal = if idle {
            std::mem::take(&mut state.journal)
        } else {
            state.journal.clone()
        };
        for entry in &journal {
            match entry {
                Journaled::Push(event) => {
                    state.view.apply_push(event);
                }
                Journaled::Confirmed(change) => state.view.confirm(change.clone()),
            }
        }
        debug!(
            user = %self.user_id,
            fetched = count,
            replayed = journal.len(),
            "notifications loaded"
        );
        self.publish(&state);
        Ok(state.view.len())
    }

    /// Mark one notification read. Already read, or not in view: no-op.
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<()> {
        let _guard = self.locks.lock(LockKey::Notification(*id)).await;

        let change = {
            let mut state = self.live_state()?;
            let change = state.view.begin_mark_read(&[*id]);
            if change.is_noop() {
                return Ok(());
            }
            self.publish(&state);
            change
        };

        let result = self.store.update_notification(id, true).await;
        self.settle(change, result, "mark_as_read")
    }

    /// Mark every notification unread at call time as read.
    ///
    /// Updates are issued one at a time. The first failure stops the run:
    /// entries already written stay read, the rest are reverted.
    pub async fn mark_all_as_read(&self) -> Result<()> {
        let targets = self.live_state()?.view.unread_ids();
        if targets.is_empty() {
            return Ok(());
        }
        let keys = targets.iter().map(|id| LockKey::Notification(*id)).collect();
        let _guards = self.locks.lock_many(keys).await;

        let change = {
            let mut state = self.live_state()?;
            let change = state.view.begin_mark_read(&targets);
            if change.is_noop() {
                return Ok(());
            }
            self.publish(&state);
            change
        };

        let Optimistic::MarkedRead(ids) = &change else {
            return Ok(());
        };
        let mut written = Vec::with_capacity(ids.len());
        let mut failure = None;
        for id in ids {
            match self.store.update_notification(id, true).await {
                Ok(()) => written.push(*id),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let (done, rest) = change.split_marked(&written);
        let mut state = self.state();
        if state.disposed {
            return match failure {
                Some(e) => Err(EngineError::mutation("mark_all_as_read", e)),
                None => Ok(()),
            };
        }
        state.confirm(done);
        match failure {
            None => {
                self.publish(&state);
                Ok(())
            }
            Some(e) => {
                warn!(
                    user = %self.user_id,
                    written = written.len(),
                    error = %e,
                    "mark_all_as_read failed, reverting the rest"
                );
                state.view.roll_back(rest);
                self.publish(&state);
                Err(EngineError::mutation("mark_all_as_read", e))
            }
        }
    }

    /// Remove a notification. On failure it is restored at its position.
    pub async fn delete_notification(&self, id: &NotificationId) -> Result<()> {
        let _guard = self.locks.lock(LockKey::Notification(*id)).await;

        let change = {
            let mut state = self.live_state()?;
            let change = state.view.begin_delete(id);
            if change.is_noop() {
                return Ok(());
            }
            self.publish(&state);
            change
        };

        let result = self.store.delete_notification(id).await;
        self.settle(change, result, "delete_notification")
    }

    /// Accept or reject a pending request addressed to this user. Returns the
    /// status the request moved to.
    ///
    /// If the request is no longer pending, the authoritative state is
    /// fetched and applied to the view before [`EngineError::StaleState`] is
    /// returned; no second transition is attempted.
    pub async fn respond_to_friend_request(
        &self,
        request_id: &FriendRequestId,
        accept: bool,
    ) -> Result<FriendRequestStatus> {
        let _guard = self.locks.lock(LockKey::Request(*request_id)).await;
        let response = Response::from_accept(accept);

        {
            let mut state = self.live_state()?;
            if let Some(known) = state.view.request_status(request_id) {
                if let Err(friend_request::TransitionError::AlreadyResolved(status)) =
                    friend_request::respond(known, response)
                {
                    debug!(request = %request_id, %status, "request already resolved locally");
                    state.view.apply_status(*request_id, status);
                    self.publish(&state);
                    return Err(EngineError::StaleState {
                        request_id: *request_id,
                        status,
                    });
                }
            }
        }

        let target = response.target();
        match self
            .store
            .update_friend_request_status(request_id, target)
            .await
        {
            Ok(()) => {
                let mut state = self.state();
                if !state.disposed {
                    state.view.apply_status(*request_id, target);
                    self.publish(&state);
                }
                info!(
                    request = %request_id,
                    status = %target,
                    notifies_sender = response.notifies_sender(),
                    "responded to friend request"
                );
                Ok(target)
            }
            Err(StoreError::StaleState(reported)) => {
                Err(self.refetch_stale(request_id, reported).await)
            }
            Err(e) => {
                warn!(request = %request_id, error = %e, "friend request response failed");
                Err(EngineError::mutation("respond_to_friend_request", e))
            }
        }
    }

    /// Merge a push event into the view. Returns whether the view changed.
    ///
    /// Normally called by the engine's own feed pump; exposed for hosts that
    /// deliver events some other way.
    pub fn on_push_event(&self, event: PushEvent) -> bool {
        let mut state = self.state();
        if state.disposed {
            return false;
        }
        let changed = state.view.apply_push(&event);
        if state.loads_in_flight > 0 {
            state.journal.push(Journaled::Push(event));
        }
        if changed {
            self.publish(&state);
        }
        changed
    }

    /// Tear the engine down. No push event is applied once this returns;
    /// in-flight mutations finish at the store without touching the view.
    pub fn dispose(&self) {
        {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.journal.clear();
        }
        self.stop_pump();
        info!(user = %self.user_id, "notification engine disposed");
    }

    async fn refetch_stale(
        &self,
        request_id: &FriendRequestId,
        reported: FriendRequestStatus,
    ) -> EngineError {
        let status = match self.store.fetch_friend_request(request_id).await {
            Ok(request) => request.status,
            Err(e) => {
                warn!(request = %request_id, error = %e, "refetch after stale response failed");
                reported
            }
        };
        let mut state = self.state();
        if !state.disposed {
            state.view.apply_status(*request_id, status);
            self.publish(&state);
        }
        info!(request = %request_id, %status, "friend request was already resolved");
        EngineError::StaleState {
            request_id: *request_id,
            status,
        }
    }

    fn settle(
        &self,
        change: Optimistic,
        result: std::result::Result<(), StoreError>,
        operation: &'static str,
    ) -> Result<()> {
        let mut state = self.state();
        match result {
            Ok(()) => {
                if !state.disposed {
                    state.confirm(change);
                    self.publish(&state);
                }
                Ok(())
            }
            Err(e) => {
                warn!(user = %self.user_id, operation, error = %e, "rolling back");
                if !state.disposed {
                    state.view.roll_back(change);
                    self.publish(&state);
                }
                Err(EngineError::mutation(operation, e))
            }
        }
    }

    fn publish(&self, state: &EngineState) {
        self.updates.send_replace(state.view.snapshot());
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_state(&self) -> Result<MutexGuard<'_, EngineState>> {
        let state = self.state();
        if state.disposed {
            return Err(EngineError::Disposed);
        }
        Ok(state)
    }

    fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Drive a subscription into the engine until either side goes away.
async fn pump(engine: Weak<NotificationEngine>, mut subscription: Subscription) {
    while let Some(delivery) = subscription.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match delivery {
            Delivery::Event(event) => {
                engine.on_push_event(event);
            }
            Delivery::Lagged(missed) => {
                if !engine.config.resync_on_lag {
                    continue;
                }
                info!(user = %engine.user_id, missed, "resynchronizing after feed lag");
                if let Err(e) = engine.load(None).await {
                    warn!(user = %engine.user_id, error = %e, "resync after lag failed");
                }
            }
        }
    }
    debug!("notification pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{notification, request, MockStore, Op};
    use fairway_realtime::RowChange;
    use fairway_types::events::Operation;
    use fairway_types::notifications::NotificationKind;
    use std::time::Duration;

    fn engine_for(store: &Arc<MockStore>, user: UserId) -> (Arc<NotificationEngine>, ChangeFeed) {
        let feed = ChangeFeed::new(16);
        let engine = NotificationEngine::start(
            user,
            Arc::clone(store) as Arc<dyn Store>,
            &feed,
            EngineConfig::default(),
        );
        (engine, feed)
    }

    async fn next_snapshot(rx: &mut watch::Receiver<ViewSnapshot>) -> ViewSnapshot {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("snapshot in time")
            .expect("engine alive");
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn test_load_orders_and_counts() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n1 = store.seed_notification(notification(me, 100));
        let n3 = store.seed_notification(notification(me, 300));
        store.seed_notification(notification(fairway_types::new_id(), 200));
        let (engine, _feed) = engine_for(&store, me);

        assert_eq!(engine.load(None).await.expect("load"), 2);

        let snap = engine.snapshot();
        assert_eq!(snap.ids(), vec![n3.id, n1.id]);
        assert_eq!(snap.unread_count, 2);
    }

    #[tokio::test]
    async fn test_empty_load_is_ok_and_failed_load_keeps_view() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let (engine, _feed) = engine_for(&store, me);
        assert_eq!(engine.load(None).await.expect("empty load"), 0);

        let n = store.seed_notification(notification(me, 100));
        engine.load(None).await.expect("load");
        store.fail(Op::Fetch);

        let err = engine.load(None).await.expect_err("fetch fails");
        assert!(matches!(err, EngineError::Fetch(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.snapshot().ids(), vec![n.id]);
    }

    #[tokio::test]
    async fn test_load_respects_limit() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        for t in 0..5 {
            store.seed_notification(notification(me, t));
        }
        let (engine, _feed) = engine_for(&store, me);

        assert_eq!(engine.load(Some(3)).await.expect("load"), 3);
        let times: Vec<_> = engine
            .snapshot()
            .notifications
            .iter()
            .map(|n| n.created_at)
            .collect();
        assert_eq!(times, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_idempotent() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");

        engine.mark_as_read(&n.id).await.expect("first");
        engine.mark_as_read(&n.id).await.expect("second");

        assert_eq!(store.calls(Op::UpdateNotification), 1);
        assert_eq!(engine.snapshot().unread_count, 0);
        assert!(store.notification(&n.id).expect("stored").read);
    }

    #[tokio::test]
    async fn test_mark_as_read_absent_id_is_noop() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let (engine, _feed) = engine_for(&store, me);

        engine
            .mark_as_read(&fairway_types::new_id())
            .await
            .expect("noop");
        assert_eq!(store.calls(Op::UpdateNotification), 0);
    }

    #[tokio::test]
    async fn test_mark_as_read_failure_rolls_back() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        store.fail(Op::UpdateNotification);

        let err = engine.mark_as_read(&n.id).await.expect_err("fails");

        assert!(matches!(
            err,
            EngineError::Mutation {
                operation: "mark_as_read",
                ..
            }
        ));
        assert_eq!(engine.snapshot().unread_count, 1);

        store.heal(Op::UpdateNotification);
        engine.mark_as_read(&n.id).await.expect("retry");
        assert_eq!(engine.snapshot().unread_count, 0);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_visible_before_store_answers() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        let gate = store.gate(Op::UpdateNotification);

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.mark_as_read(&n.id).await })
        };
        gate.entered().await;
        assert_eq!(engine.snapshot().unread_count, 0);
        gate.open();

        task.await.expect("join").expect("mark");
        assert_eq!(engine.snapshot().unread_count, 0);
    }

    #[tokio::test]
    async fn test_mark_all_as_read_scenario() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n1 = store.seed_notification(notification(me, 100));
        let mut n2 = notification(me, 200);
        n2.read = true;
        let n2 = store.seed_notification(n2);
        let n3 = store.seed_notification(notification(me, 300));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");

        engine.mark_all_as_read().await.expect("mark all");

        let snap = engine.snapshot();
        assert_eq!(snap.ids(), vec![n3.id, n2.id, n1.id]);
        assert!(snap.notifications.iter().all(|n| n.read));
        assert_eq!(snap.unread_count, 0);
        assert_eq!(store.calls(Op::UpdateNotification), 2);
    }

    #[tokio::test]
    async fn test_mark_all_as_read_partial_failure() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let newer = store.seed_notification(notification(me, 200));
        let older = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        store.fail_update_for(older.id);

        let err = engine.mark_all_as_read().await.expect_err("partial");

        assert!(matches!(err, EngineError::Mutation { .. }));
        let snap = engine.snapshot();
        assert!(snap.get(&newer.id).expect("newer").read);
        assert!(!snap.get(&older.id).expect("older").read);
        assert_eq!(snap.unread_count, 1);
    }

    #[tokio::test]
    async fn test_mark_all_excludes_later_arrivals() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        let gate = store.gate(Op::UpdateNotification);

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.mark_all_as_read().await })
        };
        gate.entered().await;
        let late = notification(me, 500);
        engine.on_push_event(PushEvent::NotificationInserted(late.clone()));
        gate.open();
        task.await.expect("join").expect("mark all");

        let snap = engine.snapshot();
        assert_eq!(snap.unread_count, 1);
        assert!(!snap.get(&late.id).expect("late").read);
    }

    #[tokio::test]
    async fn test_delete_failure_restores_position() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n1 = store.seed_notification(notification(me, 100));
        let n2 = store.seed_notification(notification(me, 200));
        let n3 = store.seed_notification(notification(me, 300));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        store.fail(Op::DeleteNotification);

        let err = engine.delete_notification(&n2.id).await.expect_err("fails");

        assert!(matches!(err, EngineError::Mutation { .. }));
        assert_eq!(engine.snapshot().ids(), vec![n3.id, n2.id, n1.id]);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let (engine, _feed) = engine_for(&store, me);

        engine
            .delete_notification(&fairway_types::new_id())
            .await
            .expect("noop");
        assert_eq!(store.calls(Op::DeleteNotification), 0);
    }

    #[tokio::test]
    async fn test_push_delete_during_failed_delete_stays_deleted() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        store.fail(Op::DeleteNotification);
        let gate = store.gate(Op::DeleteNotification);

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.delete_notification(&n.id).await })
        };
        gate.entered().await;
        engine.on_push_event(PushEvent::NotificationDeleted { id: n.id });
        gate.open();

        assert!(task.await.expect("join").is_err());
        assert!(engine.snapshot().notifications.is_empty());
    }

    #[tokio::test]
    async fn test_accept_marks_request_notification_read() {
        let me = fairway_types::new_id();
        let sender = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let r = store.seed_request(request(sender, me));
        let mut n = notification(me, 100);
        n.data.request_id = r.id;
        n.data.counterpart_id = sender;
        store.seed_notification(n.clone());
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");

        let status = engine
            .respond_to_friend_request(&r.id, true)
            .await
            .expect("accept");

        assert_eq!(status, FriendRequestStatus::Accepted);
        assert_eq!(engine.snapshot().unread_count, 0);
        assert_eq!(
            store.request(&r.id).expect("request").status,
            FriendRequestStatus::Accepted
        );
        // The sender's notification lives in the sender's view, not ours.
        assert_eq!(engine.snapshot().notifications.len(), 1);
        assert_eq!(store.notifications_of_kind(&sender, NotificationKind::FriendAccepted), 1);
    }

    #[tokio::test]
    async fn test_respond_to_already_accepted_request() {
        let me = fairway_types::new_id();
        let sender = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let r = store.seed_request(request(sender, me));
        let mut n = notification(me, 100);
        n.data.request_id = r.id;
        store.seed_notification(n.clone());
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        // Accepted from another device; the push has not arrived yet.
        store.force_status(&r.id, FriendRequestStatus::Accepted);

        let err = engine
            .respond_to_friend_request(&r.id, true)
            .await
            .expect_err("stale");

        assert!(matches!(
            err,
            EngineError::StaleState {
                status: FriendRequestStatus::Accepted,
                ..
            }
        ));
        assert!(!err.is_retryable());
        assert_eq!(store.calls(Op::FetchRequest), 1);
        assert_eq!(store.calls(Op::UpdateStatus), 1);
        assert_eq!(engine.snapshot().unread_count, 0);
        assert_eq!(store.notifications_of_kind(&sender, NotificationKind::FriendAccepted), 0);

        // Known terminal now: fails fast without touching the store.
        let again = engine.respond_to_friend_request(&r.id, false).await;
        assert!(matches!(again, Err(EngineError::StaleState { .. })));
        assert_eq!(store.calls(Op::UpdateStatus), 1);
    }

    #[tokio::test]
    async fn test_respond_failure_is_mutation_error() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let r = store.seed_request(request(fairway_types::new_id(), me));
        let (engine, _feed) = engine_for(&store, me);
        store.fail(Op::UpdateStatus);

        let err = engine
            .respond_to_friend_request(&r.id, false)
            .await
            .expect_err("fails");

        assert!(matches!(err, EngineError::Mutation { .. }));
        assert!(err.is_retryable());
        store.heal(Op::UpdateStatus);
        assert_eq!(
            engine
                .respond_to_friend_request(&r.id, false)
                .await
                .expect("retry"),
            FriendRequestStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_push_insert_during_load_survives() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let old = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        let gate = store.gate(Op::Fetch);

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.load(None).await })
        };
        gate.entered().await;
        let fresh = notification(me, 200);
        engine.on_push_event(PushEvent::NotificationInserted(fresh.clone()));
        gate.open();
        task.await.expect("join").expect("load");

        assert_eq!(engine.snapshot().ids(), vec![fresh.id, old.id]);
    }

    #[tokio::test]
    async fn test_stale_load_keeps_confirmed_mutations() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let a = store.seed_notification(notification(me, 200));
        let b = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("first load");

        store.freeze_fetch();
        let gate = store.gate(Op::Fetch);
        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.load(None).await })
        };
        gate.entered().await;

        engine.mark_as_read(&a.id).await.expect("mark");
        engine.delete_notification(&b.id).await.expect("delete");
        let settled = engine.snapshot();
        assert_eq!(settled.ids(), vec![a.id]);
        assert_eq!(settled.unread_count, 0);

        gate.open();
        task.await.expect("join").expect("stale load");

        assert_eq!(engine.snapshot(), settled);
        assert!(store.notification(&a.id).expect("a").read);
        assert!(store.notification(&b.id).is_none());
    }

    #[tokio::test]
    async fn test_feed_events_reach_the_view() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let (engine, feed) = engine_for(&store, me);
        let mut rx = engine.watch();

        let n = notification(me, 100);
        let change = RowChange::notification(Operation::Insert, &n).expect("row");
        feed.publish(change.clone());
        feed.publish(change);

        let snap = next_snapshot(&mut rx).await;
        assert_eq!(snap.ids(), vec![n.id]);
        assert_eq!(snap.unread_count, 1);
    }

    #[tokio::test]
    async fn test_dispose_stops_push_events() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let (engine, feed) = engine_for(&store, me);

        engine.dispose();
        feed.publish(RowChange::notification(Operation::Insert, &notification(me, 1)).expect("row"));
        assert!(!engine.on_push_event(PushEvent::NotificationInserted(notification(me, 2))));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(engine.snapshot().notifications.is_empty());
        assert!(matches!(engine.load(None).await, Err(EngineError::Disposed)));
        assert!(matches!(
            engine.mark_all_as_read().await,
            Err(EngineError::Disposed)
        ));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_mutation_does_not_touch_disposed_view() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let n = store.seed_notification(notification(me, 100));
        let (engine, _feed) = engine_for(&store, me);
        engine.load(None).await.expect("load");
        store.fail(Op::DeleteNotification);
        let gate = store.gate(Op::DeleteNotification);

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.delete_notification(&n.id).await })
        };
        gate.entered().await;
        engine.dispose();
        let frozen = engine.snapshot();
        gate.open();

        assert!(task.await.expect("join").is_err());
        assert_eq!(engine.snapshot(), frozen);
        assert!(frozen.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_engine_stops_pump() {
        let me = fairway_types::new_id();
        let store = Arc::new(MockStore::new());
        let (engine, feed) = engine_for(&store, me);
        assert_eq!(feed.subscriber_count(), 1);

        drop(engine);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_config_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.page_limit, DEFAULT_NOTIFICATION_LIMIT);
        assert!(config.resync_on_lag);
    }
}
