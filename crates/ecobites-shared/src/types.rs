use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{MAX_ID_LEN, MAX_MESSAGE_LEN};
use crate::error::ValidationError;

fn parse_opaque_id(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if trimmed.len() > MAX_ID_LEN || trimmed.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidId { field });
    }
    Ok(trimmed.to_string())
}

// User identity is issued by the auth side of the application and treated as
// an opaque string here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate a raw identifier coming from a request body or a signal.
    /// `field` names the input in the resulting error.
    pub fn parse(field: &'static str, raw: &str) -> Result<Self, ValidationError> {
        parse_opaque_id(field, raw).map(Self)
    }

    /// Like [`UserId::parse`] but treats an absent value as a missing field.
    pub fn require(field: &'static str, raw: Option<&str>) -> Result<Self, ValidationError> {
        Self::parse(field, raw.unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a donation listing (food or non-food).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn parse(field: &'static str, raw: &str) -> Result<Self, ValidationError> {
        parse_opaque_id(field, raw).map(Self)
    }

    pub fn require(field: &'static str, raw: Option<&str>) -> Result<Self, ValidationError> {
        Self::parse(field, raw.unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThreadId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::MissingField("threadId"));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidId { field: "threadId" })
    }
}

/// The two donation record shapes a thread can be about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Food,
    NonFood,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::NonFood => "non_food",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "food" => Ok(Self::Food),
            "non_food" | "nonfood" | "nonFood" => Ok(Self::NonFood),
            other => Err(ValidationError::UnknownItemKind(other.to_string())),
        }
    }
}

/// Reference to the item a thread is about, resolved once when the thread is
/// created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ItemRef {
    Food(ItemId),
    NonFood(ItemId),
}

impl ItemRef {
    pub fn new(kind: ItemKind, id: ItemId) -> Self {
        match kind {
            ItemKind::Food => Self::Food(id),
            ItemKind::NonFood => Self::NonFood(id),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Food(_) => ItemKind::Food,
            Self::NonFood(_) => ItemKind::NonFood,
        }
    }

    pub fn id(&self) -> &ItemId {
        match self {
            Self::Food(id) | Self::NonFood(id) => id,
        }
    }
}

/// A message in a thread's log. `seq` is its position (0-based).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub seq: u32,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Check message content before it is appended.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let len = content.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}
