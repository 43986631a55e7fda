//! In-memory store with failure injection and gates for interleaving tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fairway_types::friends::{FriendRequest, FriendRequestStatus};
use fairway_types::notifications::{Notification, NotificationData, NotificationKind};
use fairway_types::{FriendRequestId, NotificationId, Timestamp, UserId};
use tokio::sync::{Notify, Semaphore};

use crate::store::{FriendRequestStore, NotificationStore, StoreError, StoreResult};

pub(crate) fn notification(user_id: UserId, created_at: Timestamp) -> Notification {
    Notification {
        id: fairway_types::new_id(),
        user_id,
        kind: NotificationKind::FriendRequest,
        data: NotificationData {
            request_id: fairway_types::new_id(),
            counterpart_id: fairway_types::new_id(),
        },
        read: false,
        created_at,
    }
}

pub(crate) fn request(sender_id: UserId, receiver_id: UserId) -> FriendRequest {
    FriendRequest {
        id: fairway_types::new_id(),
        sender_id,
        receiver_id,
        status: FriendRequestStatus::Pending,
        created_at: 1,
        updated_at: 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Fetch,
    UpdateNotification,
    DeleteNotification,
    UpdateStatus,
    FetchRequest,
    CreateAccepted,
}

/// Holds one call of an operation until opened.
pub(crate) struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    /// Wait until a call is parked at the gate.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn open(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
struct MockState {
    notifications: HashMap<NotificationId, Notification>,
    requests: HashMap<FriendRequestId, FriendRequest>,
    failing: HashSet<Op>,
    failing_updates: HashSet<NotificationId>,
    calls: HashMap<Op, usize>,
    gates: HashMap<Op, Arc<Gate>>,
    /// When set, fetches return this instead of the live rows.
    frozen: Option<Vec<Notification>>,
    clock: Timestamp,
}

#[derive(Default)]
pub(crate) struct MockStore {
    state: Mutex<MockState>,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state")
    }

    pub(crate) fn seed_notification(&self, n: Notification) -> Notification {
        self.lock().notifications.insert(n.id, n.clone());
        n
    }

    pub(crate) fn seed_request(&self, r: FriendRequest) -> FriendRequest {
        self.lock().requests.insert(r.id, r.clone());
        r
    }

    /// Change a request's status behind the engine's back.
    pub(crate) fn force_status(&self, id: &FriendRequestId, status: FriendRequestStatus) {
        if let Some(r) = self.lock().requests.get_mut(id) {
            r.status = status;
        }
    }

    pub(crate) fn notification(&self, id: &NotificationId) -> Option<Notification> {
        self.lock().notifications.get(id).cloned()
    }

    pub(crate) fn request(&self, id: &FriendRequestId) -> Option<FriendRequest> {
        self.lock().requests.get(id).cloned()
    }

    pub(crate) fn notifications_of_kind(&self, user: &UserId, kind: NotificationKind) -> usize {
        self.lock()
            .notifications
            .values()
            .filter(|n| n.user_id == *user && n.kind == kind)
            .count()
    }

    pub(crate) fn fail(&self, op: Op) {
        self.lock().failing.insert(op);
    }

    pub(crate) fn heal(&self, op: Op) {
        self.lock().failing.remove(&op);
    }

    pub(crate) fn fail_update_for(&self, id: NotificationId) {
        self.lock().failing_updates.insert(id);
    }

    /// Make every later fetch return the rows as they are now, like a
    /// read replica that has not caught up.
    pub(crate) fn freeze_fetch(&self) {
        let mut state = self.lock();
        let rows = state.notifications.values().cloned().collect();
        state.frozen = Some(rows);
    }

    pub(crate) fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Park the next call of `op` until the returned gate is opened.
    pub(crate) fn gate(&self, op: Op) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        self.lock().gates.insert(op, Arc::clone(&gate));
        gate
    }

    /// Count the call, wait at its gate if one is set, then report an
    /// injected failure if any.
    async fn enter(&self, op: Op) -> StoreResult<()> {
        let gate = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            state.gates.remove(&op)
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.lock().failing.contains(&op) {
            return Err(StoreError::Unavailable(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn accepted_for(state: &mut MockState, request: &FriendRequest) -> Notification {
        state.clock += 1;
        let n = Notification {
            id: fairway_types::new_id(),
            user_id: request.sender_id,
            kind: NotificationKind::FriendAccepted,
            data: NotificationData {
                request_id: request.id,
                counterpart_id: request.receiver_id,
            },
            read: false,
            created_at: state.clock,
        };
        state.notifications.insert(n.id, n.clone());
        n
    }
}

#[async_trait]
impl NotificationStore for MockStore {
    async fn fetch_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        self.enter(Op::Fetch).await?;
        let state = self.lock();
        let rows: Vec<&Notification> = match &state.frozen {
            Some(frozen) => frozen.iter().collect(),
            None => state.notifications.values().collect(),
        };
        let mut list: Vec<Notification> = rows
            .into_iter()
            .filter(|n| n.user_id == *user_id)
            .cloned()
            .collect();
        drop(state);
        list.sort_by(Notification::newest_first);
        list.truncate(limit);
        Ok(list)
    }

    async fn update_notification(&self, id: &NotificationId, read: bool) -> StoreResult<()> {
        self.enter(Op::UpdateNotification).await?;
        let mut state = self.lock();
        if state.failing_updates.contains(id) {
            return Err(StoreError::Unavailable(format!("injected failure for {id}")));
        }
        match state.notifications.get_mut(id) {
            Some(n) => {
                n.read = read;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("notification {id}"))),
        }
    }

    async fn delete_notification(&self, id: &NotificationId) -> StoreResult<()> {
        self.enter(Op::DeleteNotification).await?;
        self.lock().notifications.remove(id);
        Ok(())
    }
}

#[async_trait]
impl FriendRequestStore for MockStore {
    async fn update_friend_request_status(
        &self,
        id: &FriendRequestId,
        new_status: FriendRequestStatus,
    ) -> StoreResult<()> {
        self.enter(Op::UpdateStatus).await?;
        let mut state = self.lock();
        let request = state
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("friend request {id}")))?;
        if request.status.is_terminal() {
            return Err(StoreError::StaleState(request.status));
        }
        request.status = new_status;
        let request = request.clone();
        if new_status == FriendRequestStatus::Accepted {
            Self::accepted_for(&mut state, &request);
        }
        for n in state.notifications.values_mut() {
            if n.kind == NotificationKind::FriendRequest && n.refers_to(id) {
                n.read = true;
            }
        }
        Ok(())
    }

    async fn fetch_friend_request(&self, id: &FriendRequestId) -> StoreResult<FriendRequest> {
        self.enter(Op::FetchRequest).await?;
        self.request(id)
            .ok_or_else(|| StoreError::NotFound(format!("friend request {id}")))
    }

    async fn create_friend_accepted_notification(
        &self,
        for_user_id: &UserId,
        request_id: &FriendRequestId,
    ) -> StoreResult<Notification> {
        self.enter(Op::CreateAccepted).await?;
        let mut state = self.lock();
        let request = state
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("friend request {request_id}")))?;
        if request.sender_id != *for_user_id {
            return Err(StoreError::Constraint(
                "accepted notifications go to the sender".into(),
            ));
        }
        Ok(Self::accepted_for(&mut state, &request))
    }
}
