//! Authentication core: password hashing, token lifecycle and the
//! orchestrating service that composes them with the session backends.

pub mod password;
mod service;
mod token;

pub use password::{PasswordHasher, StrengthViolation};
pub use service::AuthOrchestrator;
pub use token::{Claims, TokenIssuer, TokenPair, TokenType};
