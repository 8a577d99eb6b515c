use thiserror::Error;

use mingle_protocol::error_codes;

use crate::status::UserStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("user {0} is not authenticated")]
    AuthRequired(String),

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("user {user_id} is not a participant of match {match_id}")]
    NotAParticipant { user_id: String, match_id: String },

    #[error("match {0} has expired")]
    MatchExpired(String),

    #[error("user {user_id} is {actual}, expected {expected}")]
    InvalidState {
        user_id: String,
        expected: UserStatus,
        actual: UserStatus,
    },

    #[error("user {0} is already in an active session")]
    AlreadyInSession(String),

    #[error(transparent)]
    Storage(#[from] mingle_storage::Error),

    #[error(transparent)]
    Session(#[from] mingle_sessions::Error),
}

impl Error {
    /// Stable error code surfaced to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired(_) | Self::UnknownUser(_) => error_codes::AUTH_REQUIRED,
            Self::NotAParticipant { .. } => error_codes::NOT_A_PARTICIPANT,
            Self::MatchExpired(_) => error_codes::MATCH_EXPIRED,
            Self::InvalidState { .. } => error_codes::INVALID_STATE,
            Self::AlreadyInSession(_) => error_codes::ALREADY_IN_SESSION,
            Self::Storage(_) => error_codes::STORAGE_FAILURE,
            Self::Session(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
