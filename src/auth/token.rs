//! Token lifecycle: mint, validate, refresh, revoke.
//!
//! A token is valid while its signature and claims check out and, for
//! refresh tokens, while a live [`SessionRecord`] matches its session id and
//! hash. There is no separate in-memory state machine; the store plus claim
//! expiry drive the whole lifecycle.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AuthConfig, SessionConfig};
use crate::error::{AppError, AuthError, BackendError, TokenError};
use crate::session::{SessionCache, SessionRecord, SessionStore};
use crate::users::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub token_type: TokenType,
    pub session_id: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway_seconds: u64,
    backend_timeout: std::time::Duration,
    cache_ttl: Duration,
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn SessionCache>,
}

impl TokenIssuer {
    pub fn new(
        auth: &AuthConfig,
        session: &SessionConfig,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            issuer: auth.issuer.clone(),
            audience: auth.audience.clone(),
            access_ttl: Duration::minutes(auth.access_ttl_minutes),
            refresh_ttl: Duration::days(auth.refresh_ttl_days),
            leeway_seconds: auth.leeway_seconds,
            backend_timeout: std::time::Duration::from_millis(session.backend_timeout_ms),
            cache_ttl: Duration::seconds(session.cache_ttl_seconds),
            store,
            cache,
        }
    }

    /// SHA-256 of the raw token, base64-encoded. This is what session
    /// records and cache keys carry; raw tokens never reach a backend.
    pub fn hash_token(token: &str) -> String {
        BASE64.encode(Sha256::digest(token.as_bytes()))
    }

    /// Mints a token pair for a fresh session. The session record is written
    /// durably before any token leaves this function; a persistence failure
    /// yields no tokens.
    pub async fn issue_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();

        let access = self.mint(user, TokenType::Access, session_id, self.access_ttl)?;
        let refresh = self.mint(user, TokenType::Refresh, session_id, self.refresh_ttl)?;

        let record = SessionRecord {
            session_id,
            user_id: user.id,
            refresh_token_hash: Self::hash_token(&refresh),
            created_at: now,
            expires_at: now + self.refresh_ttl,
        };

        self.store_call(self.store.create(&record)).await?;
        self.prime_cache(&record).await;

        info!(user_id = %user.id, session_id = %session_id, "issued token pair");

        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Signature, issuer, audience, expiry and type checks only; access
    /// tokens carry no session liveness requirement.
    pub fn validate_access(&self, token: &str) -> Result<Claims, AppError> {
        Ok(self.decode_checked(token, TokenType::Access, true)?)
    }

    /// Everything `validate_access` checks, plus a live session record
    /// matching (session id, token hash). The cache is consulted first but
    /// only ever to confirm liveness; absence always falls through to the
    /// store.
    pub async fn validate_refresh(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.decode_checked(token, TokenType::Refresh, true)?;
        let session_id = parse_session_id(&claims)?;
        let hash = Self::hash_token(token);

        if let Ok(Ok(Some(record))) = timeout(self.backend_timeout, self.cache.get_by_hash(&hash)).await {
            if record.session_id == session_id && !record.is_expired() {
                debug!(session_id = %session_id, "refresh validated from cache");
                return Ok(claims);
            }
        }

        let record = self
            .store_call(self.store.find_by_hash(&hash))
            .await?
            .filter(|r| r.session_id == session_id && !r.is_expired())
            .ok_or(AuthError::SessionExpiredOrRevoked)?;

        self.prime_cache(&record).await;
        Ok(claims)
    }

    /// Mints a new access token against the existing session. The refresh
    /// token itself is not rotated; it stays valid until expiry or revoke.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, i64), AppError> {
        let claims = self.validate_refresh(refresh_token).await?;
        let session_id = parse_session_id(&claims)?;

        let access = self.mint_raw(
            &claims.sub,
            &claims.email,
            TokenType::Access,
            session_id,
            self.access_ttl,
        )?;

        debug!(session_id = %session_id, "access token refreshed");
        Ok((access, self.access_ttl.num_seconds()))
    }

    /// Deletes the session behind the token, ignoring claim expiry so
    /// expired tokens can still be revoked for cleanup. Accepts either
    /// token type; only the signature must be valid.
    pub async fn revoke(&self, token: &str) -> Result<(), AppError> {
        let claims = self.decode_any(token)?;
        let session_id = parse_session_id(&claims)?;

        self.store_call(self.store.delete_by_id(session_id)).await?;
        if let Err(e) = self.cache.delete_by_session(session_id).await {
            warn!(session_id = %session_id, error = %e, "cache invalidation failed on revoke");
        }

        info!(session_id = %session_id, "session revoked");
        Ok(())
    }

    /// "Log out everywhere": removes every session the user holds.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let removed = self.store_call(self.store.delete_by_user(user_id)).await?;
        if let Err(e) = self.cache.invalidate_user(user_id).await {
            warn!(user_id = %user_id, error = %e, "cache invalidation failed on revoke_all");
        }

        info!(user_id = %user_id, sessions = removed, "all sessions revoked");
        Ok(removed)
    }

    fn mint(
        &self,
        user: &User,
        token_type: TokenType,
        session_id: Uuid,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.mint_raw(&user.id.to_string(), &user.email, token_type, session_id, ttl)
    }

    fn mint_raw(
        &self,
        sub: &str,
        email: &str,
        token_type: TokenType,
        session_id: Uuid,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: sub.to_string(),
            email: email.to_string(),
            token_type,
            session_id: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| TokenError::Malformed)
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = validate_exp;
        validation
    }

    fn decode_checked(
        &self,
        token: &str,
        expected: TokenType,
        validate_exp: bool,
    ) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation(validate_exp))
            .map_err(map_jwt_error)?;

        if data.claims.token_type != expected {
            return Err(TokenError::WrongType);
        }
        Ok(data.claims)
    }

    fn decode_any(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation(false))
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    /// Wraps a store call in the configured timeout. Authentication paths
    /// fail closed: a slow or broken store denies the operation.
    async fn store_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, AppError> {
        match timeout(self.backend_timeout, fut).await {
            Ok(result) => result.map_err(AppError::Backend),
            Err(_) => Err(AppError::Backend(BackendError::Timeout)),
        }
    }

    /// Cache writes are best effort; a failure is logged and swallowed.
    async fn prime_cache(&self, record: &SessionRecord) {
        match timeout(self.backend_timeout, self.cache.set(record, self.cache_ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id = %record.session_id, error = %e, "cache write failed"),
            Err(_) => warn!(session_id = %record.session_id, "cache write timed out"),
        }
    }
}

fn parse_session_id(claims: &Claims) -> Result<Uuid, TokenError> {
    Uuid::parse_str(&claims.session_id).map_err(|_| TokenError::Malformed)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
            TokenError::BadSignature
        }
        _ => TokenError::Malformed,
    }
}
