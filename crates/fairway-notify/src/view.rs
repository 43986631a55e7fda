//! The reconciled view.
//!
//! Each entry keeps two read flags: `server` (the last authoritative value,
//! only ever moving false -> true) and `local` (an optimistic flip awaiting
//! confirmation). The effective flag is their union, so rolling back a
//! failed mark-read can never un-read something the server has since
//! reported as read.
//!
//! Optimistically deleted entries are parked in a stash until the store
//! answers. Push events update the stash instead of resurrecting the entry;
//! a push delete empties it so a later rollback restores nothing.

use std::collections::{HashMap, HashSet};

use fairway_realtime::PushEvent;
use fairway_types::friends::{FriendRequest, FriendRequestStatus};
use fairway_types::notifications::{Notification, NotificationKind, ViewSnapshot};
use fairway_types::{FriendRequestId, NotificationId, UserId};
use tracing::debug;

use crate::friend_request;

#[derive(Debug, Clone)]
struct Entry {
    /// `notification.read` is the server flag.
    notification: Notification,
    local_read: bool,
}

impl Entry {
    fn new(notification: Notification) -> Self {
        Self {
            notification,
            local_read: false,
        }
    }

    fn is_read(&self) -> bool {
        self.notification.read || self.local_read
    }

    /// Replace content, keeping `read` monotonic.
    fn merge(&mut self, incoming: Notification) {
        let read = self.notification.read || incoming.read;
        self.notification = incoming;
        self.notification.read = read;
    }

    fn effective(&self) -> Notification {
        let mut n = self.notification.clone();
        n.read = self.is_read();
        n
    }
}

/// An optimistic change that has been applied locally and awaits the
/// store's answer. Hand it back to [`ReconciledView::confirm`] or
/// [`ReconciledView::roll_back`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Optimistic {
    /// Nothing changed locally (already read, or absent).
    Noop,
    /// These ids were flipped to read.
    MarkedRead(Vec<NotificationId>),
    /// This id was removed and stashed.
    Deleted(NotificationId),
}

impl Optimistic {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    /// Split a mark-read into the ids in `done` and the rest.
    pub fn split_marked(self, done: &[NotificationId]) -> (Optimistic, Optimistic) {
        match self {
            Self::MarkedRead(ids) => {
                let (confirmed, rest): (Vec<_>, Vec<_>) =
                    ids.into_iter().partition(|id| done.contains(id));
                (Self::marked(confirmed), Self::marked(rest))
            }
            other => (other, Self::Noop),
        }
    }

    fn marked(ids: Vec<NotificationId>) -> Self {
        if ids.is_empty() {
            Self::Noop
        } else {
            Self::MarkedRead(ids)
        }
    }
}

/// Ordered, deduplicated notifications for one user.
#[derive(Debug, Clone)]
pub struct ReconciledView {
    user_id: UserId,
    /// Newest first, unique by id.
    entries: Vec<Entry>,
    stash: HashMap<NotificationId, Entry>,
    request_status: HashMap<FriendRequestId, FriendRequestStatus>,
}

impl ReconciledView {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            entries: Vec::new(),
            stash: HashMap::new(),
            request_status: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.position(id).is_some()
    }

    pub fn is_read(&self, id: &NotificationId) -> Option<bool> {
        self.position(id).map(|i| self.entries[i].is_read())
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_read()).count()
    }

    /// Ids of entries currently unread, newest first.
    pub fn unread_ids(&self) -> Vec<NotificationId> {
        self.entries
            .iter()
            .filter(|e| !e.is_read())
            .map(|e| e.notification.id)
            .collect()
    }

    /// Last known status of a request, if any event or response told us.
    pub fn request_status(&self, id: &FriendRequestId) -> Option<FriendRequestStatus> {
        self.request_status.get(id).copied()
    }

    /// `friend_request` notifications in view that point at `request_id`.
    pub fn notifications_for_request(&self, request_id: &FriendRequestId) -> Vec<NotificationId> {
        self.entries
            .iter()
            .filter(|e| {
                e.notification.kind == NotificationKind::FriendRequest
                    && e.notification.refers_to(request_id)
            })
            .map(|e| e.notification.id)
            .collect()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            notifications: self.entries.iter().map(Entry::effective).collect(),
            unread_count: self.unread_count(),
        }
    }

    /// Replace the whole view with a fresh fetch.
    ///
    /// In-flight optimistic state survives: stashed deletes stay hidden and
    /// pending local reads stay applied.
    pub fn replace(&mut self, fetched: Vec<Notification>) {
        let pending_reads: HashSet<NotificationId> = self
            .entries
            .iter()
            .filter(|e| e.local_read)
            .map(|e| e.notification.id)
            .collect();

        self.entries.clear();
        for notification in fetched {
            if notification.user_id != self.user_id {
                debug!(id = %notification.id, "ignoring fetched notification for another user");
                continue;
            }
            if let Some(stashed) = self.stash.get_mut(&notification.id) {
                stashed.merge(notification);
                continue;
            }
            let id = notification.id;
            let mut entry = Entry::new(notification);
            entry.local_read = pending_reads.contains(&id);
            self.upsert_entry(entry);
        }
        self.apply_known_statuses();
    }

    /// Merge a push event. Returns whether the visible view changed.
    pub fn apply_push(&mut self, event: &PushEvent) -> bool {
        let before = self.snapshot();
        match event {
            PushEvent::NotificationInserted(n) | PushEvent::NotificationUpdated(n) => {
                self.merge_notification(n.clone());
            }
            PushEvent::NotificationDeleted { id } => {
                self.remove(id);
                self.stash.remove(id);
            }
            PushEvent::FriendRequestInserted(r) | PushEvent::FriendRequestUpdated(r) => {
                self.apply_request(r);
            }
            PushEvent::FriendRequestDeleted { id } => {
                debug!(request = %id, "friend request row deleted");
            }
        }
        self.snapshot() != before
    }

    /// Record an authoritative request state. A terminal status marks the
    /// request's `friend_request` notifications read.
    pub fn apply_request(&mut self, request: &FriendRequest) {
        if !request.involves(&self.user_id) {
            return;
        }
        self.apply_status(request.id, request.status);
    }

    /// Same as [`Self::apply_request`] when only the id and status are known.
    pub fn apply_status(&mut self, request_id: FriendRequestId, status: FriendRequestStatus) {
        let merged = friend_request::merge(self.request_status(&request_id), status);
        self.request_status.insert(request_id, merged);
        if merged.is_terminal() {
            self.resolve(&request_id);
        }
    }

    /// Optimistically flip `ids` to read. Ids that are absent or already
    /// read are left out of the returned change.
    pub fn begin_mark_read(&mut self, ids: &[NotificationId]) -> Optimistic {
        let mut flipped = Vec::new();
        for id in ids {
            if let Some(i) = self.position(id) {
                let entry = &mut self.entries[i];
                if !entry.is_read() {
                    entry.local_read = true;
                    flipped.push(*id);
                }
            }
        }
        Optimistic::marked(flipped)
    }

    /// Optimistically remove `id`.
    pub fn begin_delete(&mut self, id: &NotificationId) -> Optimistic {
        match self.position(id) {
            Some(i) => {
                let entry = self.entries.remove(i);
                self.stash.insert(*id, entry);
                Optimistic::Deleted(*id)
            }
            None => Optimistic::Noop,
        }
    }

    /// The store accepted the change. Safe to repeat after [`Self::replace`]
    /// brought back rows written before the change.
    pub fn confirm(&mut self, change: Optimistic) {
        match change {
            Optimistic::Noop => {}
            Optimistic::MarkedRead(ids) => {
                for id in ids {
                    if let Some(entry) = self.entry_mut(&id) {
                        entry.notification.read = true;
                        entry.local_read = false;
                    }
                }
            }
            Optimistic::Deleted(id) => {
                self.stash.remove(&id);
                self.remove(&id);
            }
        }
    }

    /// The store refused the change: undo exactly what was applied.
    pub fn roll_back(&mut self, change: Optimistic) {
        match change {
            Optimistic::Noop => {}
            Optimistic::MarkedRead(ids) => {
                for id in ids {
                    if let Some(entry) = self.entry_mut(&id) {
                        entry.local_read = false;
                    }
                }
            }
            Optimistic::Deleted(id) => {
                // Gone if a push delete arrived in the meantime.
                if let Some(entry) = self.stash.remove(&id) {
                    self.upsert_entry(entry);
                    self.apply_known_statuses();
                }
            }
        }
    }

    fn merge_notification(&mut self, incoming: Notification) {
        if incoming.user_id != self.user_id {
            debug!(id = %incoming.id, "ignoring push for another user");
            return;
        }
        let request_id = incoming.data.request_id;
        if let Some(stashed) = self.stash.get_mut(&incoming.id) {
            stashed.merge(incoming);
            return;
        }
        match self.position(&incoming.id) {
            Some(i) => {
                let moved = self.entries[i].notification.created_at != incoming.created_at;
                self.entries[i].merge(incoming);
                if moved {
                    let entry = self.entries.remove(i);
                    self.upsert_entry(entry);
                }
            }
            None => self.upsert_entry(Entry::new(incoming)),
        }
        if self.request_status(&request_id).is_some_and(|s| s.is_terminal()) {
            self.resolve(&request_id);
        }
    }

    /// Mark the request's `friend_request` notifications read, in view and
    /// in the stash.
    fn resolve(&mut self, request_id: &FriendRequestId) {
        let targets = self
            .entries
            .iter_mut()
            .chain(self.stash.values_mut())
            .filter(|e| {
                e.notification.kind == NotificationKind::FriendRequest
                    && e.notification.refers_to(request_id)
            });
        for entry in targets {
            entry.notification.read = true;
        }
    }

    fn apply_known_statuses(&mut self) {
        let terminal: Vec<FriendRequestId> = self
            .request_status
            .iter()
            .filter(|(_, s)| s.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in terminal {
            self.resolve(&id);
        }
    }

    /// Insert keeping newest-first order, or merge if the id is present.
    fn upsert_entry(&mut self, entry: Entry) {
        if let Some(i) = self.position(&entry.notification.id) {
            self.entries[i].merge(entry.notification);
            return;
        }
        let at = self
            .entries
            .partition_point(|e| Notification::newest_first(&e.notification, &entry.notification).is_lt());
        self.entries.insert(at, entry);
    }

    fn remove(&mut self, id: &NotificationId) -> Option<Entry> {
        self.position(id).map(|i| self.entries.remove(i))
    }

    fn position(&self, id: &NotificationId) -> Option<usize> {
        self.entries.iter().position(|e| e.notification.id == *id)
    }

    fn entry_mut(&mut self, id: &NotificationId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.notification.id == *id)
    }
}
