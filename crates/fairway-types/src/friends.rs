//! Friend request structures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{FriendRequestId, Timestamp, TypesError, UserId};

/// A directed proposal of friendship between two users.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct FriendRequest {
    pub id: FriendRequestId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: FriendRequestStatus,
    pub created_at: Timestamp,
    /// Refreshed on every status transition.
    pub updated_at: Timestamp,
}

impl FriendRequest {
    /// Whether `user_id` is one of the two participants.
    pub fn involves(&self, user_id: &UserId) -> bool {
        self.sender_id == *user_id || self.receiver_id == *user_id
    }

    /// The other participant, seen from `user_id`.
    pub fn counterpart_of(&self, user_id: &UserId) -> Option<UserId> {
        if self.sender_id == *user_id {
            Some(self.receiver_id)
        } else if self.receiver_id == *user_id {
            Some(self.sender_id)
        } else {
            None
        }
    }
}

/// Lifecycle state of a friend request. `Accepted` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FriendRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FriendRequestStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}
