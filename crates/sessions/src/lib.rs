//! Active chat sessions: lifecycle, subscribers, and the message path.
//!
//! The [`SessionManager`] owns the subscriber table and routes messages,
//! typing indicators, and read receipts to the participants of a session
//! through the injected [`mingle_protocol::EventSink`]. Durable state lives
//! behind the repository traits from `mingle-storage`.

pub mod error;
pub mod manager;

pub use {
    error::{Error, Result},
    manager::{MessageLimits, SessionManager},
};
