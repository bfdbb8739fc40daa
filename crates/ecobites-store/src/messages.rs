use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};

use ecobites_shared::{ChatMessage, ThreadId, UserId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{MessageView, ParticipantView};
use crate::threads::user_id;

impl Database {
    /// Append a message to a thread's log and bump `last_message_at`.
    ///
    /// Runs as one transaction: the position is taken from the current end of
    /// the log inside the same statement that inserts the row, so appends to
    /// one thread are totally ordered.
    pub fn append_message(
        &self,
        thread_id: ThreadId,
        sender_id: &UserId,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        // Stored timestamps carry microseconds; return exactly what a later
        // read will see.
        let timestamp = timestamp.trunc_subsecs(6);
        let tx = self.conn().unchecked_transaction()?;
        let thread_key = thread_id.to_string();
        let ts = encode_ts(&timestamp);

        let exists = tx
            .query_row(
                "SELECT 1 FROM threads WHERE id = ?1",
                params![thread_key],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let seq: u32 = tx.query_row(
            "INSERT INTO messages (thread_id, seq, sender_id, content, timestamp)
             SELECT ?1, COALESCE(MAX(seq) + 1, 0), ?2, ?3, ?4
             FROM messages WHERE thread_id = ?1
             RETURNING seq",
            params![thread_key, sender_id.as_str(), content, ts],
            |row| row.get(0),
        )?;

        tx.execute(
            "UPDATE threads SET last_message_at = MAX(last_message_at, ?2) WHERE id = ?1",
            params![thread_key, ts],
        )?;

        tx.commit()?;

        Ok(ChatMessage {
            seq,
            sender_id: sender_id.clone(),
            content: content.to_string(),
            timestamp,
        })
    }

    /// The full message log of a thread, in append order.
    pub fn get_messages(&self, thread_id: ThreadId) -> Result<Vec<ChatMessage>> {
        let exists = self
            .conn()
            .query_row(
                "SELECT 1 FROM threads WHERE id = ?1",
                params![thread_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        self.load_messages(thread_id)
    }

    /// Like [`Database::get_messages`], with each sender's directory
    /// username attached.
    pub fn get_message_views(&self, thread_id: ThreadId) -> Result<Vec<MessageView>> {
        let exists = self
            .conn()
            .query_row(
                "SELECT 1 FROM threads WHERE id = ?1",
                params![thread_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let mut stmt = self.conn().prepare(
            "SELECT m.seq, m.sender_id, m.content, m.timestamp, u.username
             FROM messages m
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.thread_id = ?1
             ORDER BY m.seq ASC",
        )?;
        let rows = stmt.query_map(params![thread_id.to_string()], |row| {
            let message = row_to_message(row)?;
            let username: Option<String> = row.get(4)?;
            Ok(MessageView {
                sender: ParticipantView {
                    id: message.sender_id.clone(),
                    username,
                },
                message,
            })
        })?;

        let mut views = Vec::new();
        for row in rows {
            views.push(row?);
        }
        Ok(views)
    }

    pub(crate) fn load_messages(&self, thread_id: ThreadId) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, sender_id, content, timestamp
             FROM messages
             WHERE thread_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![thread_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub(crate) fn last_message(&self, thread_id: ThreadId) -> Result<Option<ChatMessage>> {
        let message = self
            .conn()
            .query_row(
                "SELECT seq, sender_id, content, timestamp
                 FROM messages
                 WHERE thread_id = ?1
                 ORDER BY seq DESC
                 LIMIT 1",
                params![thread_id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let seq: u32 = row.get(0)?;
    let sender: String = row.get(1)?;
    let content: String = row.get(2)?;
    let ts: String = row.get(3)?;

    Ok(ChatMessage {
        seq,
        sender_id: user_id(1, &sender)?,
        content,
        timestamp: decode_ts(3, &ts)?,
    })
}
