//! Durable session records and the best-effort cache in front of them.
//!
//! The store is the single authority for whether a refresh token is still
//! live; the cache only accelerates lookups and is never consulted for
//! revocation decisions.

mod cache;
mod store;

pub use cache::{InMemorySessionCache, SessionCache};
pub use store::{InMemorySessionStore, PgSessionStore, SessionRecord, SessionStore};
