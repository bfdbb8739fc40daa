//! # ecobites-store
//!
//! SQLite persistence for Ecobites chat threads.
//!
//! A [`Database`] wraps a single `rusqlite::Connection` and exposes typed
//! helpers for threads, their append-only message logs, and the small
//! directory of user / item summaries used when listing threads. The handle
//! is synchronous; async callers serialize access to it.

pub mod database;
pub mod directory;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod threads;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
