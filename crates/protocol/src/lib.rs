//! Client/server WebSocket protocol definitions.
//!
//! All communication uses JSON frames over WebSocket, discriminated by a
//! `type` field:
//! - [`ClientFrame`] — client → server commands
//! - [`ServerFrame`] — server → client events
//!
//! The HTTP surface reuses [`ErrorShape`] and the shared entity views defined
//! here ([`PublicProfile`], [`MessageView`], [`SessionView`]).

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const MAX_PAYLOAD_BYTES: usize = 65_536; // 64 KB per frame
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s

/// Matchmaking defaults (overridable via config).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_BALLOT_TTL_MS: u64 = 120_000;

/// Connection defaults.
pub const DEFAULT_SEND_QUEUE: usize = 256;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Message limits.
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 4_096;
pub const PAGE_SIZE_MAX: u32 = 100;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
    pub const NOT_A_PARTICIPANT: &str = "NOT_A_PARTICIPANT";
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    pub const SESSION_NOT_ACTIVE: &str = "SESSION_NOT_ACTIVE";
    pub const ALREADY_IN_SESSION: &str = "ALREADY_IN_SESSION";
    pub const MATCH_EXPIRED: &str = "MATCH_EXPIRED";
    pub const INVALID_STATE: &str = "INVALID_STATE";
    pub const INVALID_CONTENT: &str = "INVALID_CONTENT";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const STORAGE_FAILURE: &str = "STORAGE_FAILURE";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// Stable error payload sent to clients over both WS and HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Shared entity views ──────────────────────────────────────────────────────

/// The two kinds of chat a user can search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPreference {
    Friendship,
    Dating,
}

impl ChatPreference {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friendship => "friendship",
            Self::Dating => "dating",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "friendship" => Some(Self::Friendship),
            "dating" => Some(Self::Dating),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a matched partner sees about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: String,
    pub display_name: String,
    pub interests: Vec<String>,
    pub chat_preference: ChatPreference,
}

/// A message as delivered to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
    pub read_by: Vec<String>,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
}

/// A chat session as delivered to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub participants: Vec<String>,
    pub kind: ChatPreference,
    pub active: bool,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Client → server frames ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// First frame on every connection; carries the externally-verified
    /// user identity.
    Authenticate {
        #[serde(rename = "userId")]
        user_id: String,
    },
    StartSearch,
    EndSearch,
    AcceptMatch {
        #[serde(rename = "matchId")]
        match_id: String,
    },
    RejectMatch {
        #[serde(rename = "matchId")]
        match_id: String,
    },
    SendMessage {
        #[serde(rename = "sessionId")]
        session_id: String,
        content: String,
    },
    Typing {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    StopTyping {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    ReadAll {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

// ── Server → client frames ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    AuthOk {
        user: PublicProfile,
    },
    AuthError {
        reason: String,
    },
    MatchFound {
        #[serde(rename = "matchId")]
        match_id: String,
        partner: PublicProfile,
        #[serde(rename = "promptUser")]
        prompt_user: bool,
    },
    MatchConfirmed {
        #[serde(rename = "sessionId")]
        session_id: String,
        partner: PublicProfile,
    },
    MatchRejected {
        #[serde(rename = "matchId")]
        match_id: String,
    },
    MatchExpired {
        #[serde(rename = "matchId")]
        match_id: String,
    },
    NewMessage {
        #[serde(rename = "sessionId")]
        session_id: String,
        message: MessageView,
    },
    Typing {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    StopTyping {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    ReadAll {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "readerId")]
        reader_id: String,
        #[serde(rename = "upToMessageId", skip_serializing_if = "Option::is_none")]
        up_to_message_id: Option<String>,
    },
    SessionEnded {
        #[serde(rename = "sessionId")]
        session_id: String,
        by: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    /// Best-effort frames may be shed from a full send queue; everything else
    /// must either be delivered in order or close the connection.
    #[must_use]
    pub fn droppable(&self) -> bool {
        matches!(self, Self::Typing { .. } | Self::StopTyping { .. })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Event delivery seam ──────────────────────────────────────────────────────

/// Where server frames go. The gateway backs this with its connection
/// registry; tests collect frames in memory.
///
/// Implementations only enqueue — they must not block or suspend.
pub trait EventSink: Send + Sync {
    /// Directed event to the user's primary connection.
    fn send(&self, user_id: &str, frame: ServerFrame);
    /// Deliver to every live connection of the user.
    fn send_all(&self, user_id: &str, frame: ServerFrame);
}
