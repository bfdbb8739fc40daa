//! User and item summaries mirrored from the donation side of the
//! application.

use chrono::{DateTime, Utc};
use rusqlite::params;

use ecobites_shared::{ItemId, ItemKind, UserId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{not_found, Result};
use crate::models::{ItemRecord, UserRecord};
use crate::threads::{item_id, item_kind, user_id};

impl Database {
    /// Insert or replace a user's display summary.
    pub fn upsert_user(
        &self,
        id: &UserId,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<UserRecord> {
        self.conn().execute(
            "INSERT INTO users (id, username, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username,
                                           updated_at = excluded.updated_at",
            params![id.as_str(), username, encode_ts(&now)],
        )?;
        self.get_user(id)
    }

    pub fn get_user(&self, id: &UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT id, username, updated_at FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let updated_at: String = row.get(2)?;
                    Ok(UserRecord {
                        id: user_id(0, &id)?,
                        username: row.get(1)?,
                        updated_at: decode_ts(2, &updated_at)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Insert or replace an item listing.
    pub fn upsert_item(
        &self,
        id: &ItemId,
        kind: ItemKind,
        donor_id: &UserId,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<ItemRecord> {
        self.conn().execute(
            "INSERT INTO items (id, kind, donor_id, title, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET kind = excluded.kind,
                                           donor_id = excluded.donor_id,
                                           title = excluded.title,
                                           updated_at = excluded.updated_at",
            params![id.as_str(), kind.as_str(), donor_id.as_str(), title, encode_ts(&now)],
        )?;
        self.get_item(id)
    }

    pub fn get_item(&self, id: &ItemId) -> Result<ItemRecord> {
        self.conn()
            .query_row(
                "SELECT id, kind, donor_id, title, updated_at FROM items WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let kind: String = row.get(1)?;
                    let donor: String = row.get(2)?;
                    let updated_at: String = row.get(4)?;
                    Ok(ItemRecord {
                        id: item_id(0, &id)?,
                        kind: item_kind(1, &kind)?,
                        donor_id: user_id(2, &donor)?,
                        title: row.get(3)?,
                        updated_at: decode_ts(4, &updated_at)?,
                    })
                },
            )
            .map_err(not_found)
    }
}
