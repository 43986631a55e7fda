//! Friend request state machine.
//!
//! ```text
//!            accept
//!   pending ────────► accepted (terminal)
//!      │
//!      └────────────► rejected (terminal)
//!            reject
//! ```
//!
//! Accepting creates a `friend_accepted` notification for the sender.
//! Rejecting is silent. Nothing leaves a terminal state; re-proposing a
//! friendship means a new request.

use fairway_types::friends::FriendRequestStatus;

/// The receiver's answer to a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response {
    Accept,
    Reject,
}

impl Response {
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            Self::Accept
        } else {
            Self::Reject
        }
    }

    /// The status this response moves a pending request to.
    pub fn target(self) -> FriendRequestStatus {
        match self {
            Self::Accept => FriendRequestStatus::Accepted,
            Self::Reject => FriendRequestStatus::Rejected,
        }
    }

    /// Whether the counterpart is notified.
    pub fn notifies_sender(self) -> bool {
        matches!(self, Self::Accept)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("friend request is already {0}")]
    AlreadyResolved(FriendRequestStatus),
}

/// Apply `response` to a request currently in `current`.
pub fn respond(
    current: FriendRequestStatus,
    response: Response,
) -> Result<FriendRequestStatus, TransitionError> {
    match current {
        FriendRequestStatus::Pending => Ok(response.target()),
        terminal => Err(TransitionError::AlreadyResolved(terminal)),
    }
}

/// Merge a newly observed status into what is already known.
///
/// Terminal states win over pending, and the first terminal state observed
/// is kept: a conflicting second terminal state can only come from a store
/// that broke its own transition rules.
pub fn merge(known: Option<FriendRequestStatus>, observed: FriendRequestStatus) -> FriendRequestStatus {
    match known {
        Some(existing) if existing.is_terminal() => {
            if observed.is_terminal() && observed != existing {
                tracing::warn!(
                    %existing,
                    %observed,
                    "conflicting terminal friend request states, keeping the first"
                );
            }
            existing
        }
        _ => observed,
    }
}
