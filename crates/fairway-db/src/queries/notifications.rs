//! Notification query functions.

use fairway_types::notifications::{Notification, NotificationData, NotificationKind};
use fairway_types::{FriendRequestId, NotificationId, Timestamp, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::{map_constraint, parsed_column, uuid_column, DbError, Result};

const COLUMNS: &str = "id, user_id, kind, request_id, counterpart_id, read, created_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_column(row, 0)?,
        user_id: uuid_column(row, 1)?,
        kind: parsed_column::<NotificationKind>(row, 2)?,
        data: NotificationData {
            request_id: uuid_column(row, 3)?,
            counterpart_id: uuid_column(row, 4)?,
        },
        read: row.get::<_, bool>(5)?,
        created_at: row.get::<_, i64>(6)? as Timestamp,
    })
}

/// Insert a notification.
pub fn insert(conn: &Connection, notification: &Notification) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications (id, user_id, kind, request_id, counterpart_id, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            notification.id.to_string(),
            notification.user_id.to_string(),
            notification.kind.as_str(),
            notification.data.request_id.to_string(),
            notification.data.counterpart_id.to_string(),
            notification.read,
            notification.created_at as i64,
        ],
    )
    .map_err(|e| map_constraint(e, "notification"))?;
    Ok(())
}

/// Get a notification by id.
pub fn get(conn: &Connection, id: &NotificationId) -> Result<Notification> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM notifications WHERE id = ?1"),
        [id.to_string()],
        from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("notification {id}")),
        other => DbError::Sqlite(other),
    })
}

/// List the most recent notifications for a recipient, newest first.
pub fn list_for_user(conn: &Connection, user_id: &UserId, limit: usize) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM notifications
         WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2"
    ))?;

    let rows = stmt
        .query_map(
            rusqlite::params![user_id.to_string(), limit as i64],
            from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Set the read flag. Returns the updated row.
pub fn set_read(conn: &Connection, id: &NotificationId, read: bool) -> Result<Notification> {
    let changed = conn.execute(
        "UPDATE notifications SET read = ?2 WHERE id = ?1",
        rusqlite::params![id.to_string(), read],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("notification {id}")));
    }
    get(conn, id)
}

/// Mark every unread `friend_request` notification produced by `request_id`
/// as read. Returns the rows that changed.
pub fn mark_read_for_request(
    conn: &Connection,
    request_id: &FriendRequestId,
) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM notifications
         WHERE request_id = ?1 AND kind = 'friend_request' AND read = 0"
    ))?;
    let pending = stmt
        .query_map([request_id.to_string()], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    conn.execute(
        "UPDATE notifications SET read = 1
         WHERE request_id = ?1 AND kind = 'friend_request' AND read = 0",
        [request_id.to_string()],
    )?;

    Ok(pending
        .into_iter()
        .map(|mut n| {
            n.read = true;
            n
        })
        .collect())
}

/// Delete a notification. Absent ids are not an error; the deleted row is
/// returned when there was one.
pub fn delete(conn: &Connection, id: &NotificationId) -> Result<Option<Notification>> {
    let existing = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM notifications WHERE id = ?1"),
            [id.to_string()],
            from_row,
        )
        .optional()?;

    if existing.is_some() {
        conn.execute("DELETE FROM notifications WHERE id = ?1", [id.to_string()])?;
    }
    Ok(existing)
}

/// Build and insert a notification of `kind` for `user_id`.
pub fn create(
    conn: &Connection,
    user_id: &UserId,
    kind: NotificationKind,
    request_id: &FriendRequestId,
    counterpart_id: &UserId,
    now: Timestamp,
) -> Result<Notification> {
    let notification = Notification {
        id: fairway_types::new_id(),
        user_id: *user_id,
        kind,
        data: NotificationData {
            request_id: *request_id,
            counterpart_id: *counterpart_id,
        },
        read: false,
        created_at: now,
    };
    insert(conn, &notification)?;
    Ok(notification)
}
