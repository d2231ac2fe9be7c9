//! Register/login/refresh/logout/validate use cases.
//!
//! The orchestrator is the only component that touches the password hasher
//! and the credential vault directly; everything token- and session-shaped
//! goes through the [`TokenIssuer`].

use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::PasswordHasher;
use crate::auth::token::{Claims, TokenIssuer, TokenPair};
use crate::config::Settings;
use crate::error::{AppError, AuthError, BackendError, VaultError};
use crate::session::{SessionCache, SessionStore};
use crate::users::{User, UserRepository};
use crate::vault::CredentialVault;

pub struct AuthOrchestrator {
    users: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    vault: CredentialVault,
    issuer: TokenIssuer,
    backend_timeout: std::time::Duration,
}

impl AuthOrchestrator {
    pub fn new(
        settings: &Settings,
        users: Arc<dyn UserRepository>,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            users,
            hasher: PasswordHasher::new(&settings.password)?,
            vault: CredentialVault::new(&settings.vault),
            issuer: TokenIssuer::new(&settings.auth, &settings.session, store, cache),
            backend_timeout: std::time::Duration::from_millis(settings.session.backend_timeout_ms),
        })
    }

    /// Validates input, creates the user with a fixed vault salt, and logs
    /// them straight in.
    pub async fn register(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidInput("invalid email address".into()).into());
        }

        let violations = self.hasher.check_strength(password);
        if !violations.is_empty() {
            let detail = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AuthError::InvalidInput(format!("weak password: {detail}")).into());
        }

        if self.user_call(self.users.find_by_email(&email)).await?.is_some() {
            return Err(AuthError::InvalidInput("email already registered".into()).into());
        }

        let password_hash = self.hasher.hash(password)?;
        let user = User::new(email.clone(), password_hash, CredentialVault::generate_salt());
        self.user_call(self.users.create(&user)).await?;

        info!(user_id = %user.id, "user registered");
        self.issuer.issue_pair(&user).await
    }

    /// One uniform failure for unknown email, wrong password and inactive
    /// account.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let email = email.trim().to_lowercase();

        let user = self
            .user_call(self.users.find_by_email(&email))
            .await?
            .ok_or(AuthError::AuthenticationFailed)?;

        if !user.is_active || !self.hasher.verify(password, &user.password_hash) {
            return Err(AuthError::AuthenticationFailed.into());
        }

        let mut user = user;
        user.last_login = Some(chrono::Utc::now());
        if let Err(e) = self.users.update(&user).await {
            warn!(user_id = %user.id, error = %e, "failed to record last login");
        }

        info!(user_id = %user.id, "login succeeded");
        self.issuer.issue_pair(&user).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, i64), AppError> {
        self.issuer.refresh(refresh_token).await
    }

    pub async fn logout(&self, token: &str) -> Result<(), AppError> {
        self.issuer.revoke(token).await
    }

    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        self.issuer.revoke_all(user_id).await
    }

    pub fn validate(&self, access_token: &str) -> Result<Claims, AppError> {
        self.issuer.validate_access(access_token)
    }

    /// Encrypts a third-party secret under the user's persisted salt and
    /// stores it with the key verification hash.
    pub async fn store_credential(&self, user_id: Uuid, secret: &str) -> Result<(), AppError> {
        let mut user = self
            .user_call(self.users.find_by_id(user_id))
            .await?
            .ok_or(AuthError::AuthenticationFailed)?;

        let ciphertext = self.vault.encrypt(secret, user.id, &user.credential_salt)?;
        user.credential_key_hash = Some(self.vault.hash_key_material(user.id, &user.credential_salt));
        user.encrypted_credential = Some(ciphertext);

        self.user_call(self.users.update(&user)).await?;
        info!(user_id = %user.id, "credential stored");
        Ok(())
    }

    /// Decrypts the stored secret, checking the key verification hash first
    /// so a mismatched key fails before any decrypt attempt.
    pub async fn fetch_credential(&self, user_id: Uuid) -> Result<String, AppError> {
        let user = self
            .user_call(self.users.find_by_id(user_id))
            .await?
            .ok_or(AuthError::AuthenticationFailed)?;

        let ciphertext = user
            .encrypted_credential
            .as_deref()
            .ok_or(VaultError::EmptyInput)?;

        if let Some(stored) = &user.credential_key_hash {
            if *stored != self.vault.hash_key_material(user.id, &user.credential_salt) {
                return Err(VaultError::DecryptionFailed.into());
            }
        }

        Ok(self.vault.decrypt(ciphertext, user.id, &user.credential_salt)?)
    }

    /// User-repository calls share the fail-closed timeout policy of the
    /// session backends.
    async fn user_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, AppError> {
        match timeout(self.backend_timeout, fut).await {
            Ok(result) => result.map_err(AppError::Backend),
            Err(_) => Err(AppError::Backend(BackendError::Timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionCache, InMemorySessionStore};
    use crate::users::InMemoryUserRepository;

    fn orchestrator() -> AuthOrchestrator {
        let settings = Settings::new_for_test().unwrap();
        AuthOrchestrator::new(
            &settings,
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemorySessionCache::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_weak_password_lists_all_rules() {
        let auth = orchestrator();
        let err = auth.register("a@x.com", "Weak1").await.unwrap_err();
        match err {
            AppError::Auth(AuthError::InvalidInput(msg)) => {
                assert!(msg.contains("symbol"));
                assert!(msg.contains("8 characters"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_bad_email() {
        let auth = orchestrator();
        let err = auth.register("not-an-email", "Strong1!").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let auth = orchestrator();
        auth.register("a@x.com", "Strong1!").await.unwrap();
        let err = auth.register("a@x.com", "Strong1!").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_login_failure_is_uniform() {
        let auth = orchestrator();
        auth.register("a@x.com", "Strong1!").await.unwrap();

        let unknown = auth.login("b@x.com", "Strong1!").await.unwrap_err();
        let wrong = auth.login("a@x.com", "Wrong1!pw").await.unwrap_err();

        assert_eq!(
            unknown.to_string(),
            wrong.to_string(),
            "unknown email and wrong password must be indistinguishable"
        );
    }
}
