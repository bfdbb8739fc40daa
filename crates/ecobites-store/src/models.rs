//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer; field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ecobites_shared::{ChatMessage, ItemId, ItemKind, ItemRef, ThreadId, UserId};

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// A conversation between one donor and one requester about one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: ThreadId,
    pub donor_id: UserId,
    pub requester_id: UserId,
    pub item: ItemRef,
    /// Append order, which is also chronological order.
    pub messages: Vec<ChatMessage>,
    pub last_message_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn participants(&self) -> Participants {
        Participants {
            donor_id: self.donor_id.clone(),
            requester_id: self.requester_id.clone(),
        }
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.donor_id == *user || self.requester_id == *user
    }
}

/// The two parties of a thread, loaded without the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub donor_id: UserId,
    pub requester_id: UserId,
}

impl Participants {
    pub fn is_self_chat(&self) -> bool {
        self.donor_id == self.requester_id
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.donor_id == *user || self.requester_id == *user
    }

    /// The participant that is not `sender`, or `None` when `sender` is not
    /// part of the thread.
    pub fn counterpart(&self, sender: &UserId) -> Option<&UserId> {
        if *sender == self.donor_id {
            Some(&self.requester_id)
        } else if *sender == self.requester_id {
            Some(&self.donor_id)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Thread listing
// ---------------------------------------------------------------------------

/// A row of a user's inbox: the thread with display fields populated.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub donor: ParticipantView,
    pub requester: ParticipantView,
    pub item: ItemView,
    pub last_message: Option<ChatMessage>,
    pub message_count: u32,
    pub last_message_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: UserId,
    /// `None` when the user is not in the directory.
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    #[serde(flatten)]
    pub item: ItemRef,
    pub title: Option<String>,
}

/// A log entry as shown in a conversation view: the message plus who sent it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender: ParticipantView,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub updated_at: DateTime<Utc>,
}

/// A donation listing as far as chat is concerned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: ItemId,
    pub kind: ItemKind,
    pub donor_id: UserId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}
