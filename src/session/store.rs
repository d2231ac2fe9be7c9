use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BackendError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the refresh token, base64-encoded. The raw token is never
    /// persisted.
    pub refresh_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user_id: Uuid, refresh_token_hash: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            refresh_token_hash,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Durable authority for live sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> Result<(), BackendError>;
    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>, BackendError>;
    async fn find_by_hash(&self, refresh_token_hash: &str)
        -> Result<Option<SessionRecord>, BackendError>;
    async fn delete_by_id(&self, session_id: Uuid) -> Result<(), BackendError>;
    /// Deletes every session for the user, returning how many were removed.
    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, BackendError>;
    /// Removes all expired records, returning how many were swept.
    async fn sweep_expired(&self) -> Result<u64, BackendError>;
}

pub struct PgSessionStore {
    pool: Arc<PgPool>,
}

impl PgSessionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str =
    "session_id, user_id, refresh_token_hash, created_at, expires_at";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<(), BackendError> {
        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, refresh_token_hash, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.session_id)
        .bind(record.user_id)
        .bind(&record.refresh_token_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>, BackendError> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn find_by_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionRecord>, BackendError> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1"
        ))
        .bind(refresh_token_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn delete_by_id(&self, session_id: Uuid) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, BackendError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self) -> Result<u64, BackendError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory store for tests and embedded use, keyed by session id.
#[derive(Default)]
pub struct InMemorySessionStore {
    records: DashMap<Uuid, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<(), BackendError> {
        self.records.insert(record.session_id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>, BackendError> {
        Ok(self.records.get(&session_id).map(|r| r.value().clone()))
    }

    async fn find_by_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionRecord>, BackendError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.refresh_token_hash == refresh_token_hash)
            .map(|r| r.value().clone()))
    }

    async fn delete_by_id(&self, session_id: Uuid) -> Result<(), BackendError> {
        self.records.remove(&session_id);
        Ok(())
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, BackendError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.user_id != user_id);
        Ok((before - self.records.len()) as u64)
    }

    async fn sweep_expired(&self) -> Result<u64, BackendError> {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired());
        Ok((before - self.records.len()) as u64)
    }
}
