//! Session lifecycle and event routing.

use std::{collections::HashSet, sync::Arc};

use {dashmap::DashMap, tokio::sync::Mutex, tracing::debug};

use {
    mingle_common::unix_ms,
    mingle_protocol::{EventSink, MessageView, ServerFrame, SessionView},
    mingle_storage::{
        MessageRepository, SessionFilter, SessionRecord, SessionRepository, UserRepository,
    },
};

use crate::error::{Error, Result};

/// Content and paging limits, from `msg.*` config.
#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    pub max_content_bytes: usize,
    pub page_size_max: u32,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_content_bytes: mingle_protocol::DEFAULT_MAX_CONTENT_BYTES,
            page_size_max: mingle_protocol::PAGE_SIZE_MAX,
        }
    }
}

/// Owns active-session subscribers and the message path.
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserRepository>,
    sink: Arc<dyn EventSink>,
    /// session id → user ids currently receiving its events.
    subscribers: DashMap<String, HashSet<String>>,
    /// Per-session critical section: persistence order and fan-out order for
    /// one session must agree.
    send_locks: DashMap<String, Arc<Mutex<()>>>,
    limits: MessageLimits,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserRepository>,
        sink: Arc<dyn EventSink>,
        limits: MessageLimits,
    ) -> Self {
        Self {
            sessions,
            messages,
            users,
            sink,
            subscribers: DashMap::new(),
            send_locks: DashMap::new(),
            limits,
        }
    }

    /// Open a session between two users, reusing the active one if it exists.
    /// Both participants are subscribed.
    pub async fn open(
        &self,
        user_a: &str,
        user_b: &str,
        kind: mingle_protocol::ChatPreference,
    ) -> Result<SessionRecord> {
        let session = match self.sessions.find_active_between(user_a, user_b).await? {
            Some(existing) => existing,
            None => {
                let id = mingle_common::new_id();
                let session = self
                    .sessions
                    .create_session(&id, user_a, user_b, kind, unix_ms())
                    .await?;
                debug!(session_id = %session.id, user_a, user_b, "session created");
                session
            },
        };

        let mut subs = self.subscribers.entry(session.id.clone()).or_default();
        subs.insert(user_a.to_string());
        subs.insert(user_b.to_string());
        Ok(session)
    }

    /// Re-subscribe a participant (e.g. after reconnect). No-op if already
    /// subscribed.
    pub async fn subscribe(&self, session_id: &str, user_id: &str) -> Result<()> {
        let session = self.active_session_for(session_id, user_id).await?;
        self.subscribers
            .entry(session.id)
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    /// Validate, persist, and fan out one message.
    pub async fn send_message(
        &self,
        session_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageView> {
        let session = self.active_session_for(session_id, sender_id).await?;

        let content = content.trim();
        if content.is_empty() {
            return Err(Error::InvalidContent("message is empty".into()));
        }
        if content.len() > self.limits.max_content_bytes {
            return Err(Error::InvalidContent(format!(
                "message exceeds {} bytes",
                self.limits.max_content_bytes
            )));
        }
        if self
            .users
            .blocked_between(&session.user_a, &session.user_b)
            .await?
        {
            return Err(Error::Blocked);
        }

        let send_lock = Arc::clone(
            &self
                .send_locks
                .entry(session_id.to_string())
                .or_default(),
        );
        let _ordered = send_lock.lock().await;

        let record = self
            .messages
            .insert_message(session_id, sender_id, content, unix_ms())
            .await?;
        let view = record.view();

        for subscriber in self.subscribers_of(&session) {
            self.sink.send_all(
                &subscriber,
                ServerFrame::NewMessage {
                    session_id: session_id.to_string(),
                    message: view.clone(),
                },
            );
        }
        Ok(view)
    }

    /// Relay a typing indicator to the other participant. Best-effort.
    pub async fn typing(&self, session_id: &str, user_id: &str, stopped: bool) -> Result<()> {
        let session = self.active_session_for(session_id, user_id).await?;
        let Some(peer) = session.peer_of(user_id) else {
            return Ok(());
        };
        let frame = if stopped {
            ServerFrame::StopTyping {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            }
        } else {
            ServerFrame::Typing {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            }
        };
        self.sink.send(peer, frame);
        Ok(())
    }

    /// Mark every message not sent by `reader_id` as read, then notify the
    /// other participant.
    pub async fn read_all(&self, session_id: &str, reader_id: &str) -> Result<()> {
        let session = self.active_session_for(session_id, reader_id).await?;
        let up_to = self.messages.mark_read(session_id, reader_id).await?;

        if let Some(peer) = session.peer_of(reader_id) {
            self.sink.send(
                peer,
                ServerFrame::ReadAll {
                    session_id: session_id.to_string(),
                    reader_id: reader_id.to_string(),
                    up_to_message_id: up_to,
                },
            );
        }
        Ok(())
    }

    /// End an active session. The other participant is notified; the record
    /// persists but becomes immutable.
    pub async fn end(&self, session_id: &str, actor_id: &str) -> Result<SessionRecord> {
        let mut session = self.active_session_for(session_id, actor_id).await?;
        self.sessions
            .set_active(session_id, false, unix_ms())
            .await?;
        session.active = false;
        self.subscribers.remove(session_id);
        self.send_locks.remove(session_id);

        if let Some(peer) = session.peer_of(actor_id) {
            self.sink.send(
                peer,
                ServerFrame::SessionEnded {
                    session_id: session_id.to_string(),
                    by: actor_id.to_string(),
                },
            );
        }
        debug!(session_id, by = actor_id, "session ended");
        Ok(session)
    }

    /// Set or clear the archived flag. Idempotent, participant-only.
    pub async fn set_archived(
        &self,
        session_id: &str,
        actor_id: &str,
        archived: bool,
    ) -> Result<SessionView> {
        let mut session = self.session_for(session_id, actor_id).await?;
        if session.archived != archived {
            self.sessions
                .set_archived(session_id, archived, unix_ms())
                .await?;
            session.archived = archived;
        }
        Ok(session.view())
    }

    /// Participant-only read.
    pub async fn get(&self, session_id: &str, actor_id: &str) -> Result<SessionView> {
        Ok(self.session_for(session_id, actor_id).await?.view())
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<SessionView>> {
        let sessions = self.sessions.list_for_user(user_id, filter).await?;
        Ok(sessions.iter().map(SessionRecord::view).collect())
    }

    /// Page through a session's messages in server-assigned order.
    pub async fn messages_page(
        &self,
        session_id: &str,
        actor_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<MessageView>> {
        self.session_for(session_id, actor_id).await?;
        let limit = limit.clamp(1, self.limits.page_size_max);
        let records = self
            .messages
            .paginate_messages(session_id, page, limit)
            .await?;
        Ok(records.iter().map(|r| r.view()).collect())
    }

    pub async fn search_messages(
        &self,
        session_id: &str,
        actor_id: &str,
        query: &str,
    ) -> Result<Vec<MessageView>> {
        self.session_for(session_id, actor_id).await?;
        let records = self
            .messages
            .search_messages(session_id, query, self.limits.page_size_max)
            .await?;
        Ok(records.iter().map(|r| r.view()).collect())
    }

    /// Sender-only message edit.
    pub async fn edit_message(
        &self,
        message_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageView> {
        let content = content.trim();
        if content.is_empty() || content.len() > self.limits.max_content_bytes {
            return Err(Error::InvalidContent("invalid replacement content".into()));
        }
        let updated = self
            .messages
            .edit_message(message_id, sender_id, content, unix_ms())
            .await?;
        match updated {
            Some(record) => Ok(record.view()),
            None => Err(Error::NotMessageSender(message_id.to_string())),
        }
    }

    /// Sender-only message delete.
    pub async fn delete_message(&self, message_id: &str, sender_id: &str) -> Result<()> {
        if self.messages.delete_message(message_id, sender_id).await? {
            Ok(())
        } else {
            Err(Error::NotMessageSender(message_id.to_string()))
        }
    }

    pub async fn add_reaction(
        &self,
        session_id: &str,
        message_id: &str,
        reactor_id: &str,
        emoji: &str,
    ) -> Result<()> {
        self.session_for(session_id, reactor_id).await?;
        self.messages
            .add_reaction(message_id, reactor_id, emoji, unix_ms())
            .await?;
        Ok(())
    }

    /// Current subscribers of a session, defaulting to its participants.
    fn subscribers_of(&self, session: &SessionRecord) -> Vec<String> {
        match self.subscribers.get(&session.id) {
            Some(subs) => subs.iter().cloned().collect(),
            None => vec![session.user_a.clone(), session.user_b.clone()],
        }
    }

    async fn session_for(&self, session_id: &str, user_id: &str) -> Result<SessionRecord> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if !session.is_participant(user_id) {
            return Err(Error::NotAParticipant {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            });
        }
        Ok(session)
    }

    async fn active_session_for(&self, session_id: &str, user_id: &str) -> Result<SessionRecord> {
        let session = self.session_for(session_id, user_id).await?;
        if !session.active {
            return Err(Error::SessionNotActive(session_id.to_string()));
        }
        Ok(session)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sqlx::SqlitePool;

    use {
        mingle_protocol::ChatPreference,
        mingle_storage::{SqliteStore, UserRecord},
    };

    use super::*;

    /// Collects frames per user for assertions.
    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<(String, ServerFrame)>>,
    }

    impl CollectingSink {
        fn frames_for(&self, user_id: &str) -> Vec<ServerFrame> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == user_id)
                .map(|(_, f)| f.clone())
                .collect()
        }
    }

    impl EventSink for CollectingSink {
        fn send(&self, user_id: &str, frame: ServerFrame) {
            self.frames
                .lock()
                .unwrap()
                .push((user_id.to_string(), frame));
        }

        fn send_all(&self, user_id: &str, frame: ServerFrame) {
            self.send(user_id, frame);
        }
    }

    async fn fixture() -> (SessionManager, Arc<CollectingSink>, Arc<SqliteStore>) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteStore::init(&pool).await.unwrap();
        let store = Arc::new(SqliteStore::new(pool));
        let sink = Arc::new(CollectingSink::default());

        for id in ["u1", "u2", "u3"] {
            store
                .create_user(&UserRecord {
                    id: id.into(),
                    username: id.into(),
                    display_name: id.into(),
                    password_hash: "x".into(),
                    interests: vec!["music".into()],
                    chat_preference: ChatPreference::Friendship,
                    online: true,
                    status: "online".into(),
                    last_active: 0,
                    created_at: 0,
                })
                .await
                .unwrap();
        }

        let manager = SessionManager::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&sink) as _,
            MessageLimits {
                max_content_bytes: 16,
                page_size_max: 100,
            },
        );
        (manager, sink, store)
    }

    #[tokio::test]
    async fn open_reuses_the_active_session() {
        let (manager, _sink, _store) = fixture().await;
        let first = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();
        let second = manager
            .open("u2", "u1", ChatPreference::Friendship)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn message_fan_out_reaches_both_in_order() {
        let (manager, sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();

        manager.send_message(&session.id, "u1", "m1").await.unwrap();
        manager.send_message(&session.id, "u1", "m2").await.unwrap();
        manager.send_message(&session.id, "u2", "m3").await.unwrap();

        for user in ["u1", "u2"] {
            let contents: Vec<String> = sink
                .frames_for(user)
                .into_iter()
                .filter_map(|f| match f {
                    ServerFrame::NewMessage { message, .. } => Some(message.content),
                    _ => None,
                })
                .collect();
            assert_eq!(contents, vec!["m1", "m2", "m3"], "order for {user}");
        }
    }

    #[tokio::test]
    async fn content_boundary_is_exact() {
        let (manager, _sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();

        // Limit is 16 bytes in this fixture.
        let at_limit = "a".repeat(16);
        assert!(manager.send_message(&session.id, "u1", &at_limit).await.is_ok());

        let over = "a".repeat(17);
        let err = manager
            .send_message(&session.id, "u1", &over)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidContent(_)));

        let err = manager
            .send_message(&session.id, "u1", "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidContent(_)));
    }

    #[tokio::test]
    async fn outsiders_cannot_send() {
        let (manager, _sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();

        let err = manager
            .send_message(&session.id, "u3", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAParticipant { .. }));
        assert_eq!(err.code(), "NOT_A_PARTICIPANT");
    }

    #[tokio::test]
    async fn blocked_pairs_cannot_message() {
        let (manager, _sink, store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();
        store.block("u2", "u1", 1).await.unwrap();

        let err = manager
            .send_message(&session.id, "u1", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Blocked));
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn read_all_notifies_the_peer() {
        let (manager, sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();
        let sent = manager.send_message(&session.id, "u1", "hi").await.unwrap();

        manager.read_all(&session.id, "u2").await.unwrap();

        let read_frames: Vec<_> = sink
            .frames_for("u1")
            .into_iter()
            .filter(|f| matches!(f, ServerFrame::ReadAll { .. }))
            .collect();
        assert_eq!(read_frames.len(), 1);
        match &read_frames[0] {
            ServerFrame::ReadAll {
                reader_id,
                up_to_message_id,
                ..
            } => {
                assert_eq!(reader_id, "u2");
                assert_eq!(up_to_message_id.as_deref(), Some(sent.id.as_str()));
            },
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn typing_goes_to_the_peer_only() {
        let (manager, sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();

        manager.typing(&session.id, "u1", false).await.unwrap();
        manager.typing(&session.id, "u1", true).await.unwrap();

        assert!(sink.frames_for("u1").is_empty());
        let frames = sink.frames_for("u2");
        assert!(matches!(frames[0], ServerFrame::Typing { .. }));
        assert!(matches!(frames[1], ServerFrame::StopTyping { .. }));
    }

    #[tokio::test]
    async fn end_notifies_peer_and_freezes_the_session() {
        let (manager, sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();

        let ended = manager.end(&session.id, "u1").await.unwrap();
        assert!(!ended.active);

        let frames = sink.frames_for("u2");
        assert!(
            frames
                .iter()
                .any(|f| matches!(f, ServerFrame::SessionEnded { by, .. } if by == "u1"))
        );

        let err = manager
            .send_message(&session.id, "u1", "too late")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotActive(_)));

        let err = manager.end(&session.id, "u1").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotActive(_)));
    }

    #[tokio::test]
    async fn archive_is_idempotent() {
        let (manager, _sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();

        let v1 = manager.set_archived(&session.id, "u1", true).await.unwrap();
        let v2 = manager.set_archived(&session.id, "u1", true).await.unwrap();
        assert!(v1.archived && v2.archived);

        let v3 = manager
            .set_archived(&session.id, "u2", false)
            .await
            .unwrap();
        assert!(!v3.archived);
    }

    #[tokio::test]
    async fn ended_sessions_remain_readable() {
        let (manager, _sink, _store) = fixture().await;
        let session = manager
            .open("u1", "u2", ChatPreference::Friendship)
            .await
            .unwrap();
        manager.send_message(&session.id, "u1", "hello").await.unwrap();
        manager.end(&session.id, "u2").await.unwrap();

        let view = manager.get(&session.id, "u1").await.unwrap();
        assert!(!view.active);
        let page = manager
            .messages_page(&session.id, "u1", 1, 50)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }
}
