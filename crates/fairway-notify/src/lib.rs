//! # fairway-notify
//!
//! The friend-request state machine and the notification reconciliation
//! engine.
//!
//! - [`friend_request`] - pending -> accepted/rejected lifecycle
//! - [`view`] - the reconciled view and its commutative, idempotent merges
//! - [`engine`] - [`NotificationEngine`]: load, optimistic mutations, push
//!   events, teardown
//! - [`store`] - the boundary to the external notification and
//!   friend-relationship stores
//! - [`backend`] - SQLite-backed stores that publish to the change feed
//! - [`session`] - one shared engine per user across UI surfaces
//!
//! ## Consistency model
//!
//! Local mutations and push events may interleave in any order. Every merge
//! is keyed by id, `read` only moves towards true, deletes are unconditional,
//! and inserts/updates replace content. Applying the same set of events and
//! mutations in any causally consistent order converges to the same view.

pub mod backend;
pub mod engine;
pub mod friend_request;
mod locks;
pub mod session;
pub mod store;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineConfig, NotificationEngine};
pub use session::{SessionHandle, SessionRegistry};
pub use store::{FriendRequestStore, NotificationStore, Store, StoreError};

use fairway_types::friends::FriendRequestStatus;
use fairway_types::FriendRequestId;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Loading from the notification store failed. The view keeps its last
    /// known-good state.
    #[error("failed to load notifications: {0}")]
    Fetch(#[source] StoreError),

    /// An optimistic mutation failed at the store and was rolled back.
    #[error("{operation} failed and was rolled back: {source}")]
    Mutation {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// The friend request was no longer pending. Authoritative state has
    /// already been refetched and applied to the view.
    #[error("friend request {request_id} is already {status}")]
    StaleState {
        request_id: FriendRequestId,
        status: FriendRequestStatus,
    },

    /// The engine was torn down.
    #[error("notification engine has been disposed")]
    Disposed,
}

impl EngineError {
    pub(crate) fn mutation(operation: &'static str, source: StoreError) -> Self {
        Self::Mutation { operation, source }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::Mutation { source, .. } => source.is_transient(),
            Self::StaleState { .. } | Self::Disposed => false,
        }
    }
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
