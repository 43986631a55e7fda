//! Notification structures and the reconciled view snapshot.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{FriendRequestId, NotificationId, Timestamp, TypesError, UserId};

/// A per-recipient notification entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Notification {
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: NotificationData,
    /// Monotonic: false -> true only.
    #[serde(default)]
    pub read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    /// Total recency order: newest first, ties broken by id (descending).
    pub fn newest_first(a: &Notification, b: &Notification) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    }

    /// Whether this notification was produced by the given friend request.
    pub fn refers_to(&self, request_id: &FriendRequestId) -> bool {
        self.data.request_id == *request_id
    }
}

/// Notification type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Incoming friend request (recipient = request receiver).
    FriendRequest,
    /// Request accepted (recipient = original sender).
    FriendAccepted,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FriendRequest => "friend_request",
            Self::FriendAccepted => "friend_accepted",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friend_request" => Ok(Self::FriendRequest),
            "friend_accepted" => Ok(Self::FriendAccepted),
            other => Err(TypesError::UnknownKind(other.to_string())),
        }
    }
}

/// Payload referencing the originating request and the other participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct NotificationData {
    pub request_id: FriendRequestId,
    pub counterpart_id: UserId,
}

/// Immutable snapshot of the reconciled view handed to observers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct ViewSnapshot {
    /// Newest first, unique by id.
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

impl ViewSnapshot {
    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == *id)
    }

    pub fn ids(&self) -> Vec<NotificationId> {
        self.notifications.iter().map(|n| n.id).collect()
    }
}
