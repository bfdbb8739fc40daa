//! # ecobites-shared
//!
//! Types shared by the Ecobites chat store and server: identifiers, the
//! chat message model, the WebSocket signal protocol and input validation.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use types::{ChatMessage, ItemId, ItemKind, ItemRef, ThreadId, UserId};
