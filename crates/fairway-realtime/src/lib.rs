//! # fairway-realtime
//!
//! Row-level realtime change feed for the `notifications` and
//! `friend_requests` tables.
//!
//! - [`feed`] - the broadcast channel rows are published to, and per-user
//!   subscriptions filtered by recipient/participant identity
//! - [`push`] - the adapter boundary: loosely typed [`RowChange`]s are
//!   validated into tagged [`PushEvent`]s before reaching any consumer
//! - [`dedup`] - a bounded window absorbing duplicate deliveries
//!
//! Delivery is at-least-once with no ordering guarantee. Consumers must
//! merge by id.

pub mod dedup;
pub mod feed;
pub mod push;

pub use feed::{ChangeFeed, ChangeFilter, Delivery, RowChange, Subscription};
pub use push::PushEvent;

/// Error types for the change feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A row change could not be decoded into a typed event.
    #[error("malformed {table} {operation} event: {reason}")]
    Malformed {
        table: String,
        operation: String,
        reason: String,
    },

    /// The table or operation is not one this feed understands.
    #[error("unrecognized event: {0}")]
    Unrecognized(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
