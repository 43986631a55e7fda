//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Friend requests
-- ============================================================

CREATE TABLE IF NOT EXISTS friend_requests (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'rejected')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (sender_id <> receiver_id)
);

-- At most one live (non-rejected) request per unordered pair.
CREATE UNIQUE INDEX IF NOT EXISTS idx_friend_requests_live_pair
    ON friend_requests (min(sender_id, receiver_id), max(sender_id, receiver_id))
    WHERE status <> 'rejected';

CREATE INDEX IF NOT EXISTS idx_friend_requests_receiver
    ON friend_requests (receiver_id, status);
CREATE INDEX IF NOT EXISTS idx_friend_requests_sender
    ON friend_requests (sender_id, status);

-- ============================================================
-- Notifications
-- ============================================================

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('friend_request', 'friend_accepted')),
    request_id TEXT NOT NULL REFERENCES friend_requests(id) ON DELETE CASCADE,
    counterpart_id TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user_recent
    ON notifications (user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_request
    ON notifications (request_id);
"#;
