//! User persistence collaborator.
//!
//! The orchestrator reads and writes users by id or email through the
//! [`UserRepository`] trait; everything else about the user entity belongs
//! to the wider application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BackendError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    /// Salt for credential-vault key derivation, fixed at creation time.
    pub credential_salt: Vec<u8>,
    pub encrypted_credential: Option<String>,
    pub credential_key_hash: Option<String>,
}

impl User {
    pub fn new(email: String, password_hash: String, credential_salt: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
            credential_salt,
            encrypted_credential: None,
            credential_key_hash: None,
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), BackendError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, BackendError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, BackendError>;
    async fn update(&self, user: &User) -> Result<(), BackendError>;
}

pub struct PgUserRepository {
    pool: Arc<PgPool>,
}

impl PgUserRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, is_active, created_at, updated_at, \
                            last_login, credential_salt, encrypted_credential, credential_key_hash";

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User) -> Result<(), BackendError> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, is_active, created_at, updated_at, \
             last_login, credential_salt, encrypted_credential, credential_key_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login)
        .bind(&user.credential_salt)
        .bind(&user.encrypted_credential)
        .bind(&user.credential_key_hash)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, BackendError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, BackendError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn update(&self, user: &User) -> Result<(), BackendError> {
        let result = sqlx::query(
            "UPDATE users SET email = $2, password_hash = $3, is_active = $4, updated_at = $5, \
             last_login = $6, credential_salt = $7, encrypted_credential = $8, \
             credential_key_hash = $9 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(Utc::now())
        .bind(user.last_login)
        .bind(&user.credential_salt)
        .bind(&user.encrypted_credential)
        .bind(&user.credential_key_hash)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::Query("user not found".into()));
        }

        Ok(())
    }
}

/// In-memory repository for tests and embedded use.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> Result<(), BackendError> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, BackendError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, BackendError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.value().clone()))
    }

    async fn update(&self, user: &User) -> Result<(), BackendError> {
        match self.users.get_mut(&user.id) {
            Some(mut entry) => {
                *entry = user.clone();
                Ok(())
            }
            None => Err(BackendError::Query("user not found".into())),
        }
    }
}
