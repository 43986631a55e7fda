//! Friend request query functions.
//!
//! Status changes only go through [`transition`], which enforces the
//! pending -> accepted/rejected lifecycle inside a single transaction.

use fairway_types::friends::{FriendRequest, FriendRequestStatus};
use fairway_types::notifications::{Notification, NotificationKind};
use fairway_types::{FriendRequestId, Timestamp, UserId};
use rusqlite::Connection;

use crate::queries::notifications;
use crate::{map_constraint, parsed_column, uuid_column, DbError, Result};

const COLUMNS: &str = "id, sender_id, receiver_id, status, created_at, updated_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: uuid_column(row, 0)?,
        sender_id: uuid_column(row, 1)?,
        receiver_id: uuid_column(row, 2)?,
        status: parsed_column::<FriendRequestStatus>(row, 3)?,
        created_at: row.get::<_, i64>(4)? as Timestamp,
        updated_at: row.get::<_, i64>(5)? as Timestamp,
    })
}

/// Insert a friend request row.
pub fn insert(conn: &Connection, request: &FriendRequest) -> Result<()> {
    if request.sender_id == request.receiver_id {
        return Err(DbError::Constraint("cannot send a friend request to yourself".into()));
    }
    conn.execute(
        "INSERT INTO friend_requests (id, sender_id, receiver_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            request.id.to_string(),
            request.sender_id.to_string(),
            request.receiver_id.to_string(),
            request.status.as_str(),
            request.created_at as i64,
            request.updated_at as i64,
        ],
    )
    .map_err(|e| map_constraint(e, "a live friend request already exists for this pair"))?;
    Ok(())
}

/// Create a pending request together with the receiver's `friend_request`
/// notification.
pub fn create_with_notification(
    conn: &Connection,
    sender_id: &UserId,
    receiver_id: &UserId,
    now: Timestamp,
) -> Result<(FriendRequest, Notification)> {
    let request = FriendRequest {
        id: fairway_types::new_id(),
        sender_id: *sender_id,
        receiver_id: *receiver_id,
        status: FriendRequestStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let tx = conn.unchecked_transaction()?;
    insert(&tx, &request)?;
    let notification = notifications::create(
        &tx,
        receiver_id,
        NotificationKind::FriendRequest,
        &request.id,
        sender_id,
        now,
    )?;
    tx.commit()?;

    Ok((request, notification))
}

/// Get a friend request by id.
pub fn get(conn: &Connection, id: &FriendRequestId) -> Result<FriendRequest> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM friend_requests WHERE id = ?1"),
        [id.to_string()],
        from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("friend request {id}")),
        other => DbError::Sqlite(other),
    })
}

/// List every request the user participates in, newest first.
pub fn list_for_user(conn: &Connection, user_id: &UserId) -> Result<Vec<FriendRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM friend_requests
         WHERE sender_id = ?1 OR receiver_id = ?1
         ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map([user_id.to_string()], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Incoming requests still awaiting a response.
pub fn list_incoming_pending(conn: &Connection, user_id: &UserId) -> Result<Vec<FriendRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM friend_requests
         WHERE receiver_id = ?1 AND status = 'pending'
         ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map([user_id.to_string()], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids of everyone the user has an accepted request with.
pub fn list_friends(conn: &Connection, user_id: &UserId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM friend_requests
         WHERE (sender_id = ?1 OR receiver_id = ?1) AND status = 'accepted'
         ORDER BY updated_at DESC"
    ))?;
    let rows = stmt
        .query_map([user_id.to_string()], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .iter()
        .filter_map(|r| r.counterpart_of(user_id))
        .collect())
}

/// Everything a status transition wrote.
#[derive(Debug)]
pub struct Transition {
    /// The request after the update.
    pub request: FriendRequest,
    /// `friend_accepted` notification created for the sender on accept.
    pub accepted_notification: Option<Notification>,
    /// Originating `friend_request` notifications that were marked read.
    pub marked_read: Vec<Notification>,
}

/// Move a pending request to a terminal status.
///
/// The conditional update, the sender's `friend_accepted` notification and
/// marking the receiver's notification read commit together or not at all.
/// A request that is no longer pending yields [`DbError::StaleState`].
pub fn transition(
    conn: &Connection,
    id: &FriendRequestId,
    new_status: FriendRequestStatus,
    now: Timestamp,
) -> Result<Transition> {
    if !new_status.is_terminal() {
        return Err(DbError::Constraint("cannot transition back to pending".into()));
    }

    let tx = conn.unchecked_transaction()?;

    let changed = tx.execute(
        "UPDATE friend_requests SET status = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'pending'",
        rusqlite::params![id.to_string(), new_status.as_str(), now as i64],
    )?;
    if changed == 0 {
        // Either absent (NotFound) or already terminal.
        let current = get(&tx, id)?;
        return Err(DbError::StaleState(current.status));
    }

    let request = get(&tx, id)?;

    let accepted_notification = if new_status == FriendRequestStatus::Accepted {
        Some(notifications::create(
            &tx,
            &request.sender_id,
            NotificationKind::FriendAccepted,
            &request.id,
            &request.receiver_id,
            now,
        )?)
    } else {
        None
    };

    let marked_read = notifications::mark_read_for_request(&tx, id)?;

    tx.commit()?;

    tracing::debug!(request = %id, status = %new_status, "friend request transitioned");

    Ok(Transition {
        request,
        accepted_notification,
        marked_read,
    })
}
