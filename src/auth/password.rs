//! Password hashing, verification and strength policy.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;

use crate::config::PasswordConfig;
use crate::error::AuthError;

/// Symbols accepted by the strength policy.
pub const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:'\",.<>?/\\~`";

const MIN_LENGTH: usize = 8;

/// A single violated strength rule. `check_strength` reports every violation
/// so callers can render complete guidance, not just the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrengthViolation {
    TooShort,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
}

impl fmt::Display for StrengthViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StrengthViolation::TooShort => "must be at least 8 characters",
            StrengthViolation::MissingUppercase => "must contain an uppercase letter",
            StrengthViolation::MissingLowercase => "must contain a lowercase letter",
            StrengthViolation::MissingDigit => "must contain a digit",
            StrengthViolation::MissingSymbol => "must contain a symbol",
        };
        f.write_str(msg)
    }
}

pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: &PasswordConfig) -> Result<Self, AuthError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::InvalidInput(format!("bad hash parameters: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty".into()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::InvalidInput(format!("hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Never errors: a malformed hash string verifies as false.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(h) => h,
            Err(_) => return false,
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Returns every violated rule; an empty vec means the password passes.
    pub fn check_strength(&self, password: &str) -> Vec<StrengthViolation> {
        let mut violations = Vec::new();

        if password.chars().count() < MIN_LENGTH {
            violations.push(StrengthViolation::TooShort);
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            violations.push(StrengthViolation::MissingUppercase);
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            violations.push(StrengthViolation::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(StrengthViolation::MissingDigit);
        }
        if !password.chars().any(|c| SYMBOLS.contains(c)) {
            violations.push(StrengthViolation::MissingSymbol);
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(&PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_hash_verify_round_trip() {
        let h = hasher();
        let hash = h.hash("Strong1!pass").unwrap();
        assert!(h.verify("Strong1!pass", &hash));
        assert!(!h.verify("wrong-password", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let h = hasher();
        let a = h.hash("Strong1!pass").unwrap();
        let b = h.hash("Strong1!pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_password_rejected() {
        let h = hasher();
        assert!(matches!(h.hash(""), Err(AuthError::InvalidInput(_))));
    }

    #[test]
    fn test_malformed_hash_verifies_false() {
        let h = hasher();
        assert!(!h.verify("anything", "not-a-phc-string"));
        assert!(!h.verify("anything", ""));
    }

    #[test]
    fn test_strength_reports_all_violations() {
        let h = hasher();
        let violations = h.check_strength("abc");
        assert!(violations.contains(&StrengthViolation::TooShort));
        assert!(violations.contains(&StrengthViolation::MissingUppercase));
        assert!(violations.contains(&StrengthViolation::MissingDigit));
        assert!(violations.contains(&StrengthViolation::MissingSymbol));
        assert!(!violations.contains(&StrengthViolation::MissingLowercase));
    }

    #[test]
    fn test_strength_missing_symbol_only() {
        let h = hasher();
        assert_eq!(
            h.check_strength("Weak1abc"),
            vec![StrengthViolation::MissingSymbol]
        );
    }

    #[test]
    fn test_strong_password_passes() {
        let h = hasher();
        assert!(h.check_strength("Strong1!").is_empty());
    }
}
