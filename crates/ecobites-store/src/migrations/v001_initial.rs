//! v001 -- Initial schema creation.
//!
//! Creates the directory tables (`users`, `items`) and the chat tables
//! (`threads`, `messages`).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (display summaries, owned by the auth side)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL,
    updated_at TEXT NOT NULL                  -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Items (food and non-food donation listings)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS items (
    id         TEXT PRIMARY KEY NOT NULL,
    kind       TEXT NOT NULL CHECK (kind IN ('food', 'non_food')),
    donor_id   TEXT NOT NULL,
    title      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Threads
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS threads (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    donor_id        TEXT NOT NULL,
    requester_id    TEXT NOT NULL,
    item_id         TEXT NOT NULL,
    item_kind       TEXT NOT NULL CHECK (item_kind IN ('food', 'non_food')),
    last_message_at TEXT NOT NULL,
    is_active       INTEGER NOT NULL DEFAULT 1, -- boolean 0/1
    created_at      TEXT NOT NULL,

    UNIQUE (donor_id, requester_id, item_id)
);

CREATE INDEX IF NOT EXISTS idx_threads_donor ON threads(donor_id);
CREATE INDEX IF NOT EXISTS idx_threads_requester ON threads(requester_id);
CREATE INDEX IF NOT EXISTS idx_threads_last_message ON threads(last_message_at DESC);

-- ----------------------------------------------------------------
-- Messages (append-only, position = seq)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    thread_id TEXT NOT NULL,                    -- FK -> threads(id)
    seq       INTEGER NOT NULL,
    sender_id TEXT NOT NULL,
    content   TEXT NOT NULL,
    timestamp TEXT NOT NULL,

    PRIMARY KEY (thread_id, seq),
    FOREIGN KEY (thread_id) REFERENCES threads(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
