//! credguard: authentication, revocable sessions, per-user credential
//! encryption and request throttling.
//!
//! Stateful components are constructed once at process start and shared by
//! reference; there is no global mutable state. Persistence and caching are
//! consumed through the [`users::UserRepository`], [`session::SessionStore`]
//! and [`session::SessionCache`] traits.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod session;
pub mod users;
pub mod vault;

pub use config::Settings;
pub use error::{AppError, AuthError, BackendError, RateLimitError, TokenError, VaultError};

pub use auth::{AuthOrchestrator, Claims, PasswordHasher, TokenIssuer, TokenPair, TokenType};
pub use rate_limit::{Decision, RateLimitKey, RateLimiter, RateLimiterConfig, Scope};
pub use session::{
    InMemorySessionCache, InMemorySessionStore, PgSessionStore, SessionCache, SessionRecord,
    SessionStore,
};
pub use users::{InMemoryUserRepository, PgUserRepository, User, UserRepository};
pub use vault::CredentialVault;

pub type Result<T> = std::result::Result<T, AppError>;

/// Installs the process-wide tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
