//! Database query functions organized by table.

pub mod friend_requests;
pub mod notifications;
