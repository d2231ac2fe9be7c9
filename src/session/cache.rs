use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::SessionRecord;
use crate::error::BackendError;

/// Best-effort accelerator over the session store.
///
/// Entries are keyed by refresh-token hash and indexed by user. A cached
/// entry never outlives the session it mirrors: the effective TTL is the
/// smaller of the requested TTL and the session's own remaining lifetime.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get_by_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionRecord>, BackendError>;
    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), BackendError>;
    async fn delete_by_session(&self, session_id: Uuid) -> Result<(), BackendError>;
    async fn invalidate_user(&self, user_id: Uuid) -> Result<(), BackendError>;
}

struct CachedEntry {
    record: SessionRecord,
    cached_until: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemorySessionCache {
    entries: DashMap<String, CachedEntry>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops entries past their TTL. Hosts may call this periodically; reads
    /// already ignore stale entries.
    pub fn evict_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, e| e.cached_until > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn get_by_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionRecord>, BackendError> {
        if let Some(entry) = self.entries.get(refresh_token_hash) {
            if entry.cached_until > Utc::now() {
                return Ok(Some(entry.record.clone()));
            }
        }
        // Stale or missing; remove lazily so the next write starts clean.
        self.entries.remove(refresh_token_hash);
        Ok(None)
    }

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), BackendError> {
        let cached_until = std::cmp::min(Utc::now() + ttl, record.expires_at);
        self.entries.insert(
            record.refresh_token_hash.clone(),
            CachedEntry {
                record: record.clone(),
                cached_until,
            },
        );
        Ok(())
    }

    async fn delete_by_session(&self, session_id: Uuid) -> Result<(), BackendError> {
        self.entries.retain(|_, e| e.record.session_id != session_id);
        Ok(())
    }

    async fn invalidate_user(&self, user_id: Uuid) -> Result<(), BackendError> {
        self.entries.retain(|_, e| e.record.user_id != user_id);
        Ok(())
    }
}
