//! Typed push events.
//!
//! Raw change rows are normalized here so the reconciliation engine never
//! handles untyped payloads.

use fairway_types::events::{Operation, Table};
use fairway_types::friends::FriendRequest;
use fairway_types::notifications::Notification;
use fairway_types::{FriendRequestId, NotificationId};
use serde::Deserialize;

use crate::feed::RowChange;
use crate::{FeedError, Result};

/// A validated change event, tagged by table and operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushEvent {
    NotificationInserted(Notification),
    NotificationUpdated(Notification),
    NotificationDeleted { id: NotificationId },
    FriendRequestInserted(FriendRequest),
    FriendRequestUpdated(FriendRequest),
    FriendRequestDeleted { id: FriendRequestId },
}

impl PushEvent {
    pub fn table(&self) -> Table {
        match self {
            Self::NotificationInserted(_)
            | Self::NotificationUpdated(_)
            | Self::NotificationDeleted { .. } => Table::Notifications,
            Self::FriendRequestInserted(_)
            | Self::FriendRequestUpdated(_)
            | Self::FriendRequestDeleted { .. } => Table::FriendRequests,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::NotificationInserted(_) | Self::FriendRequestInserted(_) => Operation::Insert,
            Self::NotificationUpdated(_) | Self::FriendRequestUpdated(_) => Operation::Update,
            Self::NotificationDeleted { .. } | Self::FriendRequestDeleted { .. } => {
                Operation::Delete
            }
        }
    }
}

/// Deletes only carry the primary key reliably.
#[derive(Deserialize)]
struct KeyOnly {
    id: uuid::Uuid,
}

impl TryFrom<RowChange> for PushEvent {
    type Error = FeedError;

    fn try_from(change: RowChange) -> Result<Self> {
        let table: Table = change
            .table
            .parse()
            .map_err(|_| FeedError::Unrecognized(format!("table '{}'", change.table)))?;
        let operation: Operation = change
            .operation
            .parse()
            .map_err(|_| FeedError::Unrecognized(format!("operation '{}'", change.operation)))?;

        let malformed = |e: serde_json::Error| FeedError::Malformed {
            table: change.table.clone(),
            operation: change.operation.clone(),
            reason: e.to_string(),
        };

        let row = change.row.clone();
        let event = match (table, operation) {
            (Table::Notifications, Operation::Insert) => {
                Self::NotificationInserted(serde_json::from_value(row).map_err(malformed)?)
            }
            (Table::Notifications, Operation::Update) => {
                Self::NotificationUpdated(serde_json::from_value(row).map_err(malformed)?)
            }
            (Table::Notifications, Operation::Delete) => {
                let key: KeyOnly = serde_json::from_value(row).map_err(malformed)?;
                Self::NotificationDeleted { id: key.id }
            }
            (Table::FriendRequests, Operation::Insert) => {
                Self::FriendRequestInserted(serde_json::from_value(row).map_err(malformed)?)
            }
            (Table::FriendRequests, Operation::Update) => {
                Self::FriendRequestUpdated(serde_json::from_value(row).map_err(malformed)?)
            }
            (Table::FriendRequests, Operation::Delete) => {
                let key: KeyOnly = serde_json::from_value(row).map_err(malformed)?;
                Self::FriendRequestDeleted { id: key.id }
            }
        };
        Ok(event)
    }
}
