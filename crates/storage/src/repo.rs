//! Narrow repository contracts consumed by the coordinator and gateway.

use std::collections::HashSet;

use async_trait::async_trait;

use mingle_protocol::ChatPreference;

use crate::{
    error::Result,
    records::{MessageRecord, ReactionRecord, SessionRecord, UserRecord},
};

/// Filter for session listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    pub active: Option<bool>,
    pub archived: Option<bool>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &UserRecord) -> Result<()>;
    async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>>;
    async fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn update_presence(
        &self,
        id: &str,
        online: bool,
        status: &str,
        last_active: i64,
    ) -> Result<()>;
    async fn update_profile(
        &self,
        id: &str,
        display_name: &str,
        interests: &[String],
    ) -> Result<()>;
    async fn update_chat_preference(&self, id: &str, preference: ChatPreference) -> Result<()>;

    async fn block(&self, user_id: &str, target_id: &str, now: i64) -> Result<()>;
    async fn unblock(&self, user_id: &str, target_id: &str) -> Result<()>;
    /// True if either user has blocked the other.
    async fn blocked_between(&self, a: &str, b: &str) -> Result<bool>;
    /// All ids blocked by or blocking `user_id`.
    async fn blocked_ids_for(&self, user_id: &str) -> Result<HashSet<String>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session row. The caller supplies the id.
    async fn create_session(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        kind: ChatPreference,
        now: i64,
    ) -> Result<SessionRecord>;
    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>>;
    async fn set_active(&self, id: &str, active: bool, now: i64) -> Result<()>;
    async fn set_archived(&self, id: &str, archived: bool, now: i64) -> Result<()>;
    async fn find_active_between(&self, a: &str, b: &str) -> Result<Option<SessionRecord>>;
    async fn list_for_user(&self, user_id: &str, filter: SessionFilter)
    -> Result<Vec<SessionRecord>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a message and bump the session's `last_message_id`/`updated_at`
    /// in one transaction. `read_by` starts as `{sender}`.
    async fn insert_message(
        &self,
        session_id: &str,
        sender_id: &str,
        content: &str,
        now: i64,
    ) -> Result<MessageRecord>;

    /// Add `reader_id` to `read_by` on every message in the session not sent
    /// by the reader and not already read. Returns the id of the newest
    /// message covered, if any message exists.
    async fn mark_read(&self, session_id: &str, reader_id: &str) -> Result<Option<String>>;

    /// Sender-only edit. Returns the updated record, or `None` if the message
    /// does not exist or `sender_id` is not its sender.
    async fn edit_message(
        &self,
        id: &str,
        sender_id: &str,
        content: &str,
        now: i64,
    ) -> Result<Option<MessageRecord>>;

    /// Sender-only delete. Returns `true` if a row was removed.
    async fn delete_message(&self, id: &str, sender_id: &str) -> Result<bool>;

    /// Case-insensitive substring search within one session, oldest first.
    async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>>;

    /// Page through a session's messages in server-assigned order
    /// (oldest first). `page` is 1-based.
    async fn paginate_messages(
        &self,
        session_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>>;

    /// Record a reaction. Idempotent per (message, reactor, emoji).
    async fn add_reaction(
        &self,
        message_id: &str,
        reactor_id: &str,
        emoji: &str,
        now: i64,
    ) -> Result<()>;

    async fn reactions_for(&self, message_id: &str) -> Result<Vec<ReactionRecord>>;
}
