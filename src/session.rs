use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::AppResult;

type HmacSha256 = Hmac<Sha256>;

/// Session
///
/// Server-side session record. Only the SHA-256 of the cookie token is stored, and
/// `auth_hash` ties the session to the password hash the user had when it was issued:
/// a password change invalidates every session whose hash was not re-derived.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token_hash: String,
    pub user_id: i64,
    pub auth_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: &str, user_id: i64, auth_hash: String, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            token_hash: hash_token(token),
            user_id,
            auth_hash,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// 32 random bytes, hex encoded. Used for session and CSRF tokens.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// At-rest form of a session token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// HMAC of the user's password hash, keyed by the server's session secret.
pub fn session_auth_hash(secret: &str, password_hash: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(password_hash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a stored `auth_hash` against the user's current password hash.
pub fn verify_auth_hash(secret: &str, password_hash: &str, expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let mut mac = new_mac(secret);
    mac.update(password_hash.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn new_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes())
        .expect("FATAL: HMAC-SHA256 must accept keys of any length")
}

/// SessionStore
///
/// Abstract contract for session persistence, shared as `Arc<dyn SessionStore>`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> AppResult<()>;
    async fn get(&self, token_hash: &str) -> AppResult<Option<Session>>;
    /// Re-binds a session to a new password hash (password change without logout).
    async fn update_auth_hash(&self, token_hash: &str, auth_hash: &str) -> AppResult<()>;
    async fn delete(&self, token_hash: &str) -> AppResult<()>;
    /// Removes expired sessions, returning how many were dropped.
    async fn purge_expired(&self) -> AppResult<u64>;
}

/// SessionState
///
/// The concrete type used to share the session store across the application state.
pub type SessionState = Arc<dyn SessionStore>;

/// PostgresSessionStore
///
/// Sessions persisted in the `sessions` table.
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create(&self, session: Session) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, auth_hash, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(&session.auth_hash)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, token_hash: &str) -> AppResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT token_hash, user_id, auth_hash, created_at, expires_at \
             FROM sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn update_auth_hash(&self, token_hash: &str, auth_hash: &str) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET auth_hash = $2 WHERE token_hash = $1")
            .bind(token_hash)
            .bind(auth_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, token_hash: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// MemorySessionStore
///
/// Process-local session store used by tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> AppResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn get(&self, token_hash: &str) -> AppResult<Option<Session>> {
        Ok(self.sessions.read().await.get(token_hash).cloned())
    }

    async fn update_auth_hash(&self, token_hash: &str, auth_hash: &str) -> AppResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(token_hash) {
            session.auth_hash = auth_hash.to_string();
        }
        Ok(())
    }

    async fn delete(&self, token_hash: &str) -> AppResult<()> {
        self.sessions.write().await.remove(token_hash);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok((before - sessions.len()) as u64)
    }
}
