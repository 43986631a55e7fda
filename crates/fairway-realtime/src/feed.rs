//! Change feed and per-user subscriptions.
//!
//! Rows are pushed to subscribers over a bounded broadcast channel. Each
//! subscriber has an independent buffer; a subscriber that falls behind is
//! told how many changes it missed so it can resynchronize.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fairway_types::events::{Operation, Table};
use fairway_types::friends::FriendRequest;
use fairway_types::notifications::Notification;
use fairway_types::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::dedup::DedupWindow;
use crate::push::PushEvent;
use crate::Result;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// A raw row-level change, as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// Table name (e.g. "notifications").
    pub table: String,
    /// "insert" | "update" | "delete" (case-insensitive).
    pub operation: String,
    /// New row for insert/update, old row (at least the key) for delete.
    pub row: serde_json::Value,
}

impl RowChange {
    pub fn notification(operation: Operation, notification: &Notification) -> Result<Self> {
        Ok(Self {
            table: Table::Notifications.to_string(),
            operation: operation.to_string(),
            row: serde_json::to_value(notification)?,
        })
    }

    pub fn friend_request(operation: Operation, request: &FriendRequest) -> Result<Self> {
        Ok(Self {
            table: Table::FriendRequests.to_string(),
            operation: operation.to_string(),
            row: serde_json::to_value(request)?,
        })
    }

    /// Stable identity of this exact change (object keys serialize sorted).
    pub(crate) fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.table,
            self.operation.to_ascii_lowercase(),
            self.row
        )
    }

    fn uuid_field(&self, field: &str) -> Option<uuid::Uuid> {
        self.row
            .get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
    }

    fn is_delete(&self) -> bool {
        self.operation.eq_ignore_ascii_case("delete")
    }
}

/// Recipient/participant filter for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    pub user_id: UserId,
}

impl ChangeFilter {
    pub fn for_user(user_id: UserId) -> Self {
        Self { user_id }
    }

    /// Check if a change is addressed to this filter's user.
    ///
    /// Deletes that carry only a key cannot be attributed and are passed
    /// through; removing an absent id is a no-op downstream. Unrecognized
    /// tables pass so the adapter can report them.
    pub fn matches(&self, change: &RowChange) -> bool {
        match change.table.parse::<Table>() {
            Ok(Table::Notifications) => match change.uuid_field("user_id") {
                Some(recipient) => recipient == self.user_id,
                None => change.is_delete(),
            },
            Ok(Table::FriendRequests) => {
                let sender = change.uuid_field("sender_id");
                let receiver = change.uuid_field("receiver_id");
                match (sender, receiver) {
                    (None, None) => change.is_delete(),
                    (s, r) => s == Some(self.user_id) || r == Some(self.user_id),
                }
            }
            Err(_) => true,
        }
    }
}

/// The change feed rows are published to.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RowChange>,
    sequence: Arc<AtomicU64>,
    dedup_window: usize,
}

impl ChangeFeed {
    /// Create a new feed with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
            dedup_window: crate::dedup::DEFAULT_DEDUP_WINDOW,
        }
    }

    /// Override how many recent changes each subscription remembers.
    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }

    /// Publish a change to all subscribers.
    pub fn publish(&self, change: RowChange) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!(table = %change.table, operation = %change.operation, "publishing row change");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(change);
    }

    /// Subscribe to changes addressed to `filter`.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
            dedup: DedupWindow::new(self.dedup_window),
            closed: false,
        }
    }

    /// Number of changes published so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(PushEvent),
    /// The subscriber fell behind and this many changes were dropped.
    Lagged(u64),
}

/// A live, filtered subscription.
pub struct Subscription {
    receiver: broadcast::Receiver<RowChange>,
    filter: ChangeFilter,
    dedup: DedupWindow,
    closed: bool,
}

impl Subscription {
    /// Wait for the next typed event for this subscriber.
    ///
    /// Returns `None` once unsubscribed or when the feed is gone. Malformed
    /// changes are logged and skipped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if self.closed {
                return None;
            }
            match self.receiver.recv().await {
                Ok(change) => {
                    if !self.filter.matches(&change) {
                        continue;
                    }
                    if !self.dedup.first_sighting(&change) {
                        debug!(table = %change.table, "dropping duplicate delivery");
                        continue;
                    }
                    match PushEvent::try_from(change) {
                        Ok(event) => return Some(Delivery::Event(event)),
                        Err(e) => {
                            warn!(error = %e, "dropping malformed push event");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, user = %self.filter.user_id, "change feed subscriber lagged");
                    self.dedup.clear();
                    return Some(Delivery::Lagged(missed));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Stop receiving. Takes effect immediately: `recv` returns `None` from
    /// here on.
    pub fn unsubscribe(&mut self) {
        self.closed = true;
        self.receiver = self.receiver.resubscribe();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}
