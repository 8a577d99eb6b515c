//! Account registration, login, and bearer tokens.
//!
//! Passwords are stored as argon2id hashes. Tokens are 32 random bytes,
//! base64url on the wire and SHA-256 at rest, so a leaked database does not
//! leak usable credentials.

use std::sync::Arc;

use {
    argon2::{
        Argon2,
        password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
    },
    base64::Engine,
    rand::RngCore,
    sha2::{Digest, Sha256},
    sqlx::SqlitePool,
    thiserror::Error,
    tracing::info,
};

use {
    mingle_common::unix_ms,
    mingle_protocol::{ChatPreference, error_codes},
    mingle_storage::{UserRecord, UserRepository},
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username is already taken")]
    UsernameTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing or invalid bearer token")]
    TokenRequired,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] mingle_storage::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl AuthError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UsernameTaken | Self::Invalid(_) => error_codes::INVALID_CONTENT,
            Self::InvalidCredentials | Self::TokenRequired => error_codes::AUTH_REQUIRED,
            Self::Storage(_) | Self::Sqlx(_) => error_codes::STORAGE_FAILURE,
            Self::Hash(_) => error_codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// A freshly registered or logged-in identity.
#[derive(Debug)]
pub struct Authenticated {
    pub user: UserRecord,
    pub token: String,
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    pool: SqlitePool,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, pool: SqlitePool) -> Self {
        Self { users, pool }
    }

    /// Create the token table. Idempotent.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tokens (
                token_hash TEXT    PRIMARY KEY,
                user_id    TEXT    NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        display_name: &str,
        interests: Vec<String>,
        chat_preference: ChatPreference,
    ) -> Result<Authenticated> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::Invalid("username is required".into()));
        }
        if password.len() < 8 {
            return Err(AuthError::Invalid(
                "password must be at least 8 characters".into(),
            ));
        }
        if self.users.get_by_username(username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();

        let display_name = if display_name.trim().is_empty() {
            username
        } else {
            display_name.trim()
        };
        let now = unix_ms();
        let user = UserRecord {
            id: mingle_common::new_id(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            password_hash,
            interests,
            chat_preference,
            online: false,
            status: "offline".into(),
            last_active: now,
            created_at: now,
        };
        self.users.create_user(&user).await?;
        info!(user_id = %user.id, username, "user registered");

        let token = self.issue_token(&user.id).await?;
        Ok(Authenticated { user, token })
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Authenticated> {
        let user = self
            .users
            .get_by_username(username.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let token = self.issue_token(&user.id).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(Authenticated { user, token })
    }

    /// Resolve a bearer token to a user id.
    pub async fn verify_token(&self, token: &str) -> Result<String> {
        let row = sqlx::query_as::<_, (String,)>("SELECT user_id FROM tokens WHERE token_hash = ?")
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.0).ok_or(AuthError::TokenRequired)
    }

    async fn issue_token(&self, user_id: &str) -> Result<String> {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        sqlx::query("INSERT INTO tokens (token_hash, user_id, created_at) VALUES (?, ?, ?)")
            .bind(hash_token(&token))
            .bind(user_id)
            .bind(unix_ms())
            .execute(&self.pool)
            .await?;
        Ok(token)
    }
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use mingle_storage::SqliteStore;

    use super::*;

    async fn service() -> AuthService {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteStore::init(&pool).await.unwrap();
        AuthService::init(&pool).await.unwrap();
        let store = Arc::new(SqliteStore::new(pool.clone()));
        AuthService::new(store, pool)
    }

    #[tokio::test]
    async fn register_login_and_verify() {
        let auth = service().await;
        let registered = auth
            .register(
                "ada",
                "correct horse",
                "Ada",
                vec!["music".into()],
                ChatPreference::Friendship,
            )
            .await
            .unwrap();

        let user_id = auth.verify_token(&registered.token).await.unwrap();
        assert_eq!(user_id, registered.user.id);

        let logged_in = auth.login("ada", "correct horse").await.unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);
        assert_ne!(logged_in.token, registered.token);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = service().await;
        auth.register(
            "ada",
            "correct horse",
            "Ada",
            vec![],
            ChatPreference::Dating,
        )
        .await
        .unwrap();

        let err = auth.login("ada", "wrong horse").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(err.code(), "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let auth = service().await;
        auth.register("ada", "correct horse", "Ada", vec![], ChatPreference::Friendship)
            .await
            .unwrap();
        let err = auth
            .register("ada", "other password", "Ada2", vec![], ChatPreference::Friendship)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken));
    }

    #[tokio::test]
    async fn short_passwords_are_rejected() {
        let auth = service().await;
        let err = auth
            .register("bob", "short", "Bob", vec![], ChatPreference::Friendship)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[tokio::test]
    async fn bogus_tokens_fail() {
        let auth = service().await;
        let err = auth.verify_token("not-a-token").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRequired));
    }
}
