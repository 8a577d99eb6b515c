use thiserror::Error;

use mingle_protocol::error_codes;

#[derive(Debug, Error)]
pub enum Error {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {0} is no longer active")]
    SessionNotActive(String),

    #[error("user {user_id} is not a participant of session {session_id}")]
    NotAParticipant {
        user_id: String,
        session_id: String,
    },

    #[error("only the sender may modify message {0}")]
    NotMessageSender(String),

    #[error("{0}")]
    InvalidContent(String),

    #[error("messaging is blocked between these users")]
    Blocked,

    #[error(transparent)]
    Storage(#[from] mingle_storage::Error),
}

impl Error {
    /// Stable error code surfaced to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            Self::SessionNotActive(_) => error_codes::SESSION_NOT_ACTIVE,
            Self::NotAParticipant { .. } | Self::NotMessageSender(_) => {
                error_codes::NOT_A_PARTICIPANT
            },
            Self::InvalidContent(_) => error_codes::INVALID_CONTENT,
            Self::Blocked => error_codes::INVALID_STATE,
            Self::Storage(_) => error_codes::STORAGE_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
