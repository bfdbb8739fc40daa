use thiserror::Error;

/// Malformed input to a thread operation or a connection signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} is not a valid identifier")]
    InvalidId { field: &'static str },

    #[error("Donor and requester must be different users")]
    SelfChat,

    #[error("Message content must not be empty")]
    EmptyContent,

    #[error("Message content too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("User {0} is not a participant of this thread")]
    NotParticipant(String),

    #[error("Unknown item kind: {0}")]
    UnknownItemKind(String),

    #[error("Item {item} is listed as {stored}, not {requested}")]
    ItemKindMismatch {
        item: String,
        stored: &'static str,
        requested: &'static str,
    },

    #[error("Item {item} is not listed by donor {donor}")]
    ItemDonorMismatch { item: String, donor: String },
}
