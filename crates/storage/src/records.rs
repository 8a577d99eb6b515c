//! Row types for the durable store.

use mingle_protocol::{ChatPreference, MessageView, PublicProfile, SessionView};

/// A registered user.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    /// Normalized interest tags (lowercased, trimmed, de-duplicated).
    pub interests: Vec<String>,
    pub chat_preference: ChatPreference,
    pub online: bool,
    /// Last persisted status label (`offline`, `online`, `searching`, …).
    pub status: String,
    pub last_active: i64,
    pub created_at: i64,
}

impl UserRecord {
    #[must_use]
    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            interests: self.interests.clone(),
            chat_preference: self.chat_preference,
        }
    }
}

/// A chat session between two users.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub kind: ChatPreference,
    pub active: bool,
    pub archived: bool,
    pub last_message_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRecord {
    #[must_use]
    pub fn participants(&self) -> [&str; 2] {
        [self.user_a.as_str(), self.user_b.as_str()]
    }

    #[must_use]
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other participant, if `user_id` is one of the pair.
    #[must_use]
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.user_a == user_id {
            Some(&self.user_b)
        } else if self.user_b == user_id {
            Some(&self.user_a)
        } else {
            None
        }
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.clone(),
            participants: vec![self.user_a.clone(), self.user_b.clone()],
            kind: self.kind,
            active: self.active,
            archived: self.archived,
            last_message_id: self.last_message_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
    /// User ids that have read the message. Always contains the sender.
    pub read_by: Vec<String>,
    pub edited: bool,
    pub edited_at: Option<i64>,
}

impl MessageRecord {
    #[must_use]
    pub fn view(&self) -> MessageView {
        MessageView {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            read_by: self.read_by.clone(),
            edited: self.edited,
            edited_at: self.edited_at,
        }
    }
}

/// An emoji reaction on a message.
#[derive(Debug, Clone)]
pub struct ReactionRecord {
    pub message_id: String,
    pub reactor_id: String,
    pub emoji: String,
    pub created_at: i64,
}
