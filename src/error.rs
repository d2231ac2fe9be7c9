use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Auth(AuthError::Token(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Backend(err.into())
    }
}

/// Failures of the authentication use cases.
///
/// `AuthenticationFailed` deliberately carries one fixed message regardless
/// of the underlying cause (unknown email, wrong password, deactivated
/// account) so responses cannot be used for account enumeration.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid credentials")]
    AuthenticationFailed,

    #[error("Session expired or revoked")]
    SessionExpiredOrRevoked,

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Structural token validation failures, independent of session liveness.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Wrong token type for this operation")]
    WrongType,

    #[error("Malformed token")]
    Malformed,
}

/// Vault failures never include plaintext, ciphertext or key material in
/// their messages.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VaultError {
    #[error("Empty input")]
    EmptyInput,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Key derivation failed")]
    KeyDerivation,
}

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    Exceeded { retry_after_seconds: i64 },
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend call timed out")]
    Timeout,

    #[error("Query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => BackendError::Timeout,
            sqlx::Error::Io(e) => BackendError::Unavailable(e.to_string()),
            _ => BackendError::Query(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::Auth(AuthError::AuthenticationFailed);
        assert_eq!(err.to_string(), "Authentication error: Invalid credentials");

        let err = AppError::Auth(AuthError::SessionExpiredOrRevoked);
        assert_eq!(
            err.to_string(),
            "Authentication error: Session expired or revoked"
        );

        let err = AppError::Vault(VaultError::DecryptionFailed);
        assert_eq!(err.to_string(), "Vault error: Decryption failed");
    }

    #[test]
    fn test_uniform_credential_failure_message() {
        // Whatever the cause, callers see the same text.
        let err = AuthError::AuthenticationFailed;
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_token_error_conversion() {
        let err: AppError = TokenError::Expired.into();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::Token(TokenError::Expired))
        ));
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: BackendError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, BackendError::Timeout));

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::Backend(BackendError::Query(_))));
    }

    #[test]
    fn test_rate_limit_error_carries_retry_after() {
        let err = RateLimitError::Exceeded {
            retry_after_seconds: 42,
        };
        assert!(err.to_string().contains("42"));
    }
}
