//! Durable storage for users, sessions, and messages.
//!
//! The coordinator and gateway consume the narrow repository traits in
//! [`repo`]; [`sqlite::SqliteStore`] is the production implementation.
//! Tests run against `sqlite::memory:`.

pub mod error;
pub mod records;
pub mod repo;
pub mod sqlite;

pub use {
    error::{Error, Result},
    records::{MessageRecord, ReactionRecord, SessionRecord, UserRecord},
    repo::{MessageRepository, SessionFilter, SessionRepository, UserRepository},
    sqlite::SqliteStore,
};
