//! SQLite-backed repositories.
//!
//! Multi-record mutations (message insert + session bump, read receipts,
//! deletes that touch the session's last-message pointer) run inside sqlx
//! transactions.

use std::collections::HashSet;

use {async_trait::async_trait, sqlx::SqlitePool};

use mingle_protocol::ChatPreference;

use crate::{
    error::{Error, Result},
    records::{MessageRecord, ReactionRecord, SessionRecord, UserRecord},
    repo::{MessageRepository, SessionFilter, SessionRepository, UserRepository},
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema. Idempotent; called at startup and by tests using
    /// in-memory databases.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id              TEXT    PRIMARY KEY,
                username        TEXT    NOT NULL UNIQUE,
                display_name    TEXT    NOT NULL,
                password_hash   TEXT    NOT NULL,
                interests       TEXT    NOT NULL,
                chat_preference TEXT    NOT NULL,
                online          INTEGER NOT NULL DEFAULT 0,
                status          TEXT    NOT NULL DEFAULT 'offline',
                last_active     INTEGER NOT NULL,
                created_at      INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id              TEXT    PRIMARY KEY,
                user_a          TEXT    NOT NULL,
                user_b          TEXT    NOT NULL,
                kind            TEXT    NOT NULL,
                active          INTEGER NOT NULL DEFAULT 1,
                archived        INTEGER NOT NULL DEFAULT 0,
                last_message_id TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_a ON sessions (user_a, active)",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_b ON sessions (user_b, active)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT    NOT NULL UNIQUE,
                session_id TEXT    NOT NULL,
                sender_id  TEXT    NOT NULL,
                content    TEXT    NOT NULL,
                created_at INTEGER NOT NULL,
                read_by    TEXT    NOT NULL,
                edited     INTEGER NOT NULL DEFAULT 0,
                edited_at  INTEGER
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, seq)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reactions (
                message_id TEXT    NOT NULL,
                reactor_id TEXT    NOT NULL,
                emoji      TEXT    NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, reactor_id, emoji)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                user_id    TEXT    NOT NULL,
                target_id  TEXT    NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, target_id)
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

type UserRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    bool,
    String,
    i64,
    i64,
);

fn user_from_row(r: UserRow) -> Result<UserRecord> {
    let interests: Vec<String> = serde_json::from_str(&r.4)?;
    let chat_preference = ChatPreference::parse(&r.5)
        .ok_or_else(|| Error::message(format!("unknown chat preference '{}'", r.5)))?;
    Ok(UserRecord {
        id: r.0,
        username: r.1,
        display_name: r.2,
        password_hash: r.3,
        interests,
        chat_preference,
        online: r.6,
        status: r.7,
        last_active: r.8,
        created_at: r.9,
    })
}

const USER_COLUMNS: &str = "id, username, display_name, password_hash, interests, \
     chat_preference, online, status, last_active, created_at";

type SessionRow = (
    String,
    String,
    String,
    String,
    bool,
    bool,
    Option<String>,
    i64,
    i64,
);

fn session_from_row(r: SessionRow) -> Result<SessionRecord> {
    let kind = ChatPreference::parse(&r.3)
        .ok_or_else(|| Error::message(format!("unknown session kind '{}'", r.3)))?;
    Ok(SessionRecord {
        id: r.0,
        user_a: r.1,
        user_b: r.2,
        kind,
        active: r.4,
        archived: r.5,
        last_message_id: r.6,
        created_at: r.7,
        updated_at: r.8,
    })
}

const SESSION_COLUMNS: &str =
    "id, user_a, user_b, kind, active, archived, last_message_id, created_at, updated_at";

type MessageRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    bool,
    Option<i64>,
);

fn message_from_row(r: MessageRow) -> Result<MessageRecord> {
    let read_by: Vec<String> = serde_json::from_str(&r.5)?;
    Ok(MessageRecord {
        id: r.0,
        session_id: r.1,
        sender_id: r.2,
        content: r.3,
        created_at: r.4,
        read_by,
        edited: r.6,
        edited_at: r.7,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, session_id, sender_id, content, created_at, read_by, edited, edited_at";

#[async_trait]
impl UserRepository for SqliteStore {
    async fn create_user(&self, user: &UserRecord) -> Result<()> {
        let interests = serde_json::to_string(&user.interests)?;
        sqlx::query(
            "INSERT INTO users
             (id, username, display_name, password_hash, interests,
              chat_preference, online, status, last_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(&interests)
        .bind(user.chat_preference.as_str())
        .bind(user.online)
        .bind(&user.status)
        .bind(user.last_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).transpose()
    }

    async fn update_presence(
        &self,
        id: &str,
        online: bool,
        status: &str,
        last_active: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET online = ?, status = ?, last_active = ? WHERE id = ?")
            .bind(online)
            .bind(status)
            .bind(last_active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: &str,
        display_name: &str,
        interests: &[String],
    ) -> Result<()> {
        let interests = serde_json::to_string(interests)?;
        sqlx::query("UPDATE users SET display_name = ?, interests = ? WHERE id = ?")
            .bind(display_name)
            .bind(&interests)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_chat_preference(&self, id: &str, preference: ChatPreference) -> Result<()> {
        sqlx::query("UPDATE users SET chat_preference = ? WHERE id = ?")
            .bind(preference.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn block(&self, user_id: &str, target_id: &str, now: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO blocks (user_id, target_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(target_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unblock(&self, user_id: &str, target_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM blocks WHERE user_id = ? AND target_id = ?")
            .bind(user_id)
            .bind(target_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn blocked_between(&self, a: &str, b: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM blocks
             WHERE (user_id = ? AND target_id = ?) OR (user_id = ? AND target_id = ?)",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 > 0)
    }

    async fn blocked_ids_for(&self, user_id: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT target_id FROM blocks WHERE user_id = ?
             UNION
             SELECT user_id FROM blocks WHERE target_id = ?",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn create_session(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        kind: ChatPreference,
        now: i64,
    ) -> Result<SessionRecord> {
        sqlx::query(
            "INSERT INTO sessions
             (id, user_a, user_b, kind, active, archived, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, 0, ?, ?)",
        )
        .bind(id)
        .bind(user_a)
        .bind(user_b)
        .bind(kind.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(SessionRecord {
            id: id.to_string(),
            user_a: user_a.to_string(),
            user_b: user_b.to_string(),
            kind,
            active: true,
            archived: false,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(session_from_row).transpose()
    }

    async fn set_active(&self, id: &str, active: bool, now: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_archived(&self, id: &str, archived: bool, now: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET archived = ?, updated_at = ? WHERE id = ?")
            .bind(archived)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_active_between(&self, a: &str, b: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE active = 1
               AND ((user_a = ? AND user_b = ?) OR (user_a = ? AND user_b = ?))
             LIMIT 1"
        ))
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.pool)
        .await?;
        row.map(session_from_row).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<SessionRecord>> {
        let mut sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE (user_a = ? OR user_b = ?)"
        );
        if let Some(active) = filter.active {
            sql.push_str(if active { " AND active = 1" } else { " AND active = 0" });
        }
        if let Some(archived) = filter.archived {
            sql.push_str(if archived { " AND archived = 1" } else { " AND archived = 0" });
        }
        sql.push_str(" ORDER BY updated_at DESC");

        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(session_from_row).collect()
    }
}

#[async_trait]
impl MessageRepository for SqliteStore {
    async fn insert_message(
        &self,
        session_id: &str,
        sender_id: &str,
        content: &str,
        now: i64,
    ) -> Result<MessageRecord> {
        let id = mingle_common::new_id();
        let read_by = serde_json::to_string(&[sender_id])?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, session_id, sender_id, content, created_at, read_by)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(sender_id)
        .bind(content)
        .bind(now)
        .bind(&read_by)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE sessions SET last_message_id = ?, updated_at = ? WHERE id = ?")
            .bind(&id)
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(MessageRecord {
            id,
            session_id: session_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: now,
            read_by: vec![sender_id.to_string()],
            edited: false,
            edited_at: None,
        })
    }

    async fn mark_read(&self, session_id: &str, reader_id: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let unread = sqlx::query_as::<_, (String, String)>(
            "SELECT id, read_by FROM messages WHERE session_id = ? AND sender_id != ?",
        )
        .bind(session_id)
        .bind(reader_id)
        .fetch_all(&mut *tx)
        .await?;

        for (id, read_by_raw) in unread {
            let mut read_by: Vec<String> = serde_json::from_str(&read_by_raw)?;
            if read_by.iter().any(|r| r == reader_id) {
                continue;
            }
            read_by.push(reader_id.to_string());
            sqlx::query("UPDATE messages SET read_by = ? WHERE id = ?")
                .bind(serde_json::to_string(&read_by)?)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }

        let newest = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM messages WHERE session_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(newest.map(|r| r.0))
    }

    async fn edit_message(
        &self,
        id: &str,
        sender_id: &str,
        content: &str,
        now: i64,
    ) -> Result<Option<MessageRecord>> {
        let changed = sqlx::query(
            "UPDATE messages SET content = ?, edited = 1, edited_at = ?
             WHERE id = ? AND sender_id = ?",
        )
        .bind(content)
        .bind(now)
        .bind(id)
        .bind(sender_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if changed == 0 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(message_from_row).transpose()
    }

    async fn delete_message(&self, id: &str, sender_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let target = sqlx::query_as::<_, (String,)>(
            "SELECT session_id FROM messages WHERE id = ? AND sender_id = ?",
        )
        .bind(id)
        .bind(sender_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((session_id,)) = target else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Repoint the session's last-message if we just removed it.
        let newest = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM messages WHERE session_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(&session_id)
        .fetch_optional(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE sessions SET last_message_id = ? WHERE id = ? AND last_message_id = ?",
        )
        .bind(newest.map(|r| r.0))
        .bind(&session_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ? AND content LIKE ?
             ORDER BY seq ASC
             LIMIT ?"
        ))
        .bind(session_id)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn paginate_messages(
        &self,
        session_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let page = page.max(1);
        let offset = (page - 1) * limit;
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?
             ORDER BY seq ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn add_reaction(
        &self,
        message_id: &str,
        reactor_id: &str,
        emoji: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO reactions (message_id, reactor_id, emoji, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(reactor_id)
        .bind(emoji)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reactions_for(&self, message_id: &str) -> Result<Vec<ReactionRecord>> {
        let rows = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT message_id, reactor_id, emoji, created_at FROM reactions
             WHERE message_id = ?
             ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| ReactionRecord {
                message_id: r.0,
                reactor_id: r.1,
                emoji: r.2,
                created_at: r.3,
            })
            .collect())
    }
}
