//! CRUD operations for [`Thread`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use ecobites_shared::{ItemId, ItemKind, ItemRef, ThreadId, UserId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{not_found, Result};
use crate::models::{ItemView, ParticipantView, Participants, Thread, ThreadSummary};

const THREAD_COLUMNS: &str =
    "id, donor_id, requester_id, item_id, item_kind, last_message_at, is_active, created_at";

/// A `threads` row without its message log.
struct ThreadRow {
    id: ThreadId,
    donor_id: UserId,
    requester_id: UserId,
    item: ItemRef,
    last_message_at: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the thread keyed by `(donor_id, requester_id, item)`, creating
    /// an empty one if none exists. The flag is `true` when a row was created.
    ///
    /// The insert and the lookup are keyed on the same unique index, so two
    /// concurrent callers always end up with the same thread.
    pub fn get_or_create_thread(
        &self,
        donor_id: &UserId,
        requester_id: &UserId,
        item: &ItemRef,
        now: DateTime<Utc>,
    ) -> Result<(Thread, bool)> {
        let now = encode_ts(&now);
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO threads
                 (id, donor_id, requester_id, item_id, item_kind, last_message_at, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?6)",
            params![
                ThreadId::new().to_string(),
                donor_id.as_str(),
                requester_id.as_str(),
                item.id().as_str(),
                item.kind().as_str(),
                now,
            ],
        )?;

        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {THREAD_COLUMNS} FROM threads
                     WHERE donor_id = ?1 AND requester_id = ?2 AND item_id = ?3"
                ),
                params![donor_id.as_str(), requester_id.as_str(), item.id().as_str()],
                row_to_thread,
            )
            .map_err(not_found)?;

        if inserted > 0 {
            tracing::debug!(thread = %row.id, donor = %donor_id, requester = %requester_id, "thread created");
        }

        Ok((self.with_messages(row)?, inserted > 0))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a thread and its full message log.
    pub fn get_thread(&self, id: ThreadId) -> Result<Thread> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.to_string()],
                row_to_thread,
            )
            .map_err(not_found)?;
        self.with_messages(row)
    }

    /// Fetch only the two parties of a thread.
    pub fn get_participants(&self, id: ThreadId) -> Result<Participants> {
        self.conn()
            .query_row(
                "SELECT donor_id, requester_id FROM threads WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let donor: String = row.get(0)?;
                    let requester: String = row.get(1)?;
                    Ok(Participants {
                        donor_id: user_id(0, &donor)?,
                        requester_id: user_id(1, &requester)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// List every thread `user` takes part in, most recently active first,
    /// with directory fields filled in for display.
    ///
    /// Self-chats are never returned, however they got into the table.
    pub fn list_threads_for_user(&self, user: &UserId) -> Result<Vec<ThreadSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT t.id, t.donor_id, t.requester_id, t.item_id, t.item_kind,
                    t.last_message_at, t.is_active, t.created_at,
                    du.username, ru.username, i.title,
                    (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.id)
             FROM threads t
             LEFT JOIN users du ON du.id = t.donor_id
             LEFT JOIN users ru ON ru.id = t.requester_id
             LEFT JOIN items i ON i.id = t.item_id
             WHERE (t.donor_id = ?1 OR t.requester_id = ?1)
               AND t.donor_id <> t.requester_id
             ORDER BY t.last_message_at DESC, t.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            let thread = row_to_thread(row)?;
            let donor_name: Option<String> = row.get(8)?;
            let requester_name: Option<String> = row.get(9)?;
            let title: Option<String> = row.get(10)?;
            let count: u32 = row.get(11)?;
            Ok((thread, donor_name, requester_name, title, count))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (thread, donor_name, requester_name, title, message_count) = row?;
            let last_message = self.last_message(thread.id)?;
            summaries.push(ThreadSummary {
                id: thread.id,
                donor: ParticipantView {
                    id: thread.donor_id,
                    username: donor_name,
                },
                requester: ParticipantView {
                    id: thread.requester_id,
                    username: requester_name,
                },
                item: ItemView {
                    item: thread.item,
                    title,
                },
                last_message,
                message_count,
                last_message_at: thread.last_message_at,
                is_active: thread.is_active,
                created_at: thread.created_at,
            });
        }
        Ok(summaries)
    }

    fn with_messages(&self, row: ThreadRow) -> Result<Thread> {
        let messages = self.load_messages(row.id)?;
        Ok(Thread {
            id: row.id,
            donor_id: row.donor_id,
            requester_id: row.requester_id,
            item: row.item,
            messages,
            last_message_at: row.last_message_at,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn user_id(idx: usize, raw: &str) -> rusqlite::Result<UserId> {
    UserId::parse("userId", raw).map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn item_kind(idx: usize, raw: &str) -> rusqlite::Result<ItemKind> {
    raw.parse::<ItemKind>().map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn item_id(idx: usize, raw: &str) -> rusqlite::Result<ItemId> {
    ItemId::parse("itemId", raw).map_err(|e| conversion_failure(idx, e))
}

/// Map the leading [`THREAD_COLUMNS`] of a row.
fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    let id_str: String = row.get(0)?;
    let donor: String = row.get(1)?;
    let requester: String = row.get(2)?;
    let item: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let last_message_at: String = row.get(5)?;
    let is_active: bool = row.get(6)?;
    let created_at: String = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_failure(0, e))?;

    Ok(ThreadRow {
        id: ThreadId(id),
        donor_id: user_id(1, &donor)?,
        requester_id: user_id(2, &requester)?,
        item: ItemRef::new(item_kind(4, &kind)?, item_id(3, &item)?),
        last_message_at: decode_ts(5, &last_message_at)?,
        is_active,
        created_at: decode_ts(7, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    fn user(id: &str) -> UserId {
        UserId::parse("userId", id).unwrap()
    }

    fn food(id: &str) -> ItemRef {
        ItemRef::Food(ItemId::parse("itemId", id).unwrap())
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (first, created) = db
            .get_or_create_thread(&user("d"), &user("r"), &food("i"), Utc::now())
            .unwrap();
        assert!(created);
        assert!(first.messages.is_empty());
        assert!(first.is_active);

        let (second, created) = db
            .get_or_create_thread(&user("d"), &user("r"), &food("i"), Utc::now())
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let count: u32 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn different_item_gives_different_thread() {
        let db = Database::open_in_memory().unwrap();
        let (a, _) = db
            .get_or_create_thread(&user("d"), &user("r"), &food("i1"), Utc::now())
            .unwrap();
        let (b, _) = db
            .get_or_create_thread(&user("d"), &user("r"), &food("i2"), Utc::now())
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn get_missing_thread_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_thread(ThreadId::new()), Err(StoreError::NotFound)));
        assert!(matches!(
            db.get_participants(ThreadId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_orders_by_last_message_and_skips_self_chat() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        let (older, _) = db
            .get_or_create_thread(&user("d"), &user("r"), &food("i1"), t0)
            .unwrap();
        let (newer, _) = db
            .get_or_create_thread(&user("d2"), &user("d"), &food("i2"), t0)
            .unwrap();
        // A self-chat that slipped past validation.
        db.get_or_create_thread(&user("d"), &user("d"), &food("i3"), t0)
            .unwrap();

        db.append_message(older.id, &user("r"), "hi", t0 + chrono::Duration::seconds(1))
            .unwrap();
        db.append_message(newer.id, &user("d2"), "hello", t0 + chrono::Duration::seconds(2))
            .unwrap();

        let list = db.list_threads_for_user(&user("d")).unwrap();
        let ids: Vec<ThreadId> = list.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert_eq!(list[0].message_count, 1);
        assert_eq!(
            list[0].last_message.as_ref().map(|m| m.content.as_str()),
            Some("hello")
        );
    }

    #[test]
    fn list_fills_directory_fields() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&user("d"), "Dana", Utc::now()).unwrap();
        db.upsert_item(
            &ItemId::parse("itemId", "i").unwrap(),
            ItemKind::Food,
            &user("d"),
            "Fresh bread",
            Utc::now(),
        )
        .unwrap();
        db.get_or_create_thread(&user("d"), &user("r"), &food("i"), Utc::now())
            .unwrap();

        let list = db.list_threads_for_user(&user("r")).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].donor.username.as_deref(), Some("Dana"));
        assert_eq!(list[0].requester.username, None);
        assert_eq!(list[0].item.title.as_deref(), Some("Fresh bread"));
        assert!(list[0].last_message.is_none());
    }
}
