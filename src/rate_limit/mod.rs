//! Request throttling keyed by (scope, endpoint class, identifier).
//!
//! Each key's record lives in a concurrent map; mutations happen under the
//! map's per-entry guard, so concurrent checks on one key are serialized
//! while unrelated keys never contend. The engine itself is in-memory and
//! infallible; [`RateLimiter::check_bounded`] adds the fail-open policy for
//! hosts that treat the limiter as a backend with a deadline.

mod algorithms;

pub use algorithms::{Algorithm, Decision};
use algorithms::{apply, RecordState};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::RateLimitSettings;

/// Who is being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Ip,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub scope: Scope,
    pub endpoint_class: String,
    pub identifier: String,
}

impl RateLimitKey {
    pub fn ip(endpoint_class: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            scope: Scope::Ip,
            endpoint_class: endpoint_class.into(),
            identifier: addr.into(),
        }
    }

    pub fn user(endpoint_class: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            scope: Scope::User,
            endpoint_class: endpoint_class.into(),
            identifier: user_id.into(),
        }
    }

    fn map_key(&self) -> String {
        let scope = match self.scope {
            Scope::Ip => "ip",
            Scope::User => "user",
        };
        format!("{scope}:{}:{}", self.endpoint_class, self.identifier)
    }

    /// Blocks apply to the caller, not to one endpoint class.
    fn block_key(&self) -> String {
        let scope = match self.scope {
            Scope::Ip => "ip",
            Scope::User => "user",
        };
        format!("{scope}:{}", self.identifier)
    }
}

/// User-agent fragments that mark obvious automation.
const AUTOMATION_SIGNATURES: &[&str] = &[
    "curl", "wget", "python-requests", "httpie", "bot", "crawler", "spider", "scrapy",
];

pub fn is_automation_signature(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    AUTOMATION_SIGNATURES.iter().any(|sig| ua.contains(sig))
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Named rules per endpoint class.
    pub rules: HashMap<String, Algorithm>,
    /// Applied to endpoint classes with no named rule.
    pub default_rule: Algorithm,
    /// Internal rapid-fire rule; tripping it flags the caller regardless of
    /// the endpoint rule.
    pub rapid_rule: Algorithm,
    /// Extended denial window for flagged callers.
    pub block_duration: Duration,
    pub idle_max_age: Duration,
    pub fail_open: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "login".to_string(),
            Algorithm::SlidingWindow {
                max_requests: 15,
                window_seconds: 300,
            },
        );
        rules.insert(
            "register".to_string(),
            Algorithm::FixedWindow {
                max_requests: 10,
                window_seconds: 3600,
            },
        );
        rules.insert(
            "api_general".to_string(),
            Algorithm::SlidingWindow {
                max_requests: 100,
                window_seconds: 60,
            },
        );

        Self {
            rules,
            default_rule: Algorithm::SlidingWindow {
                max_requests: 60,
                window_seconds: 60,
            },
            rapid_rule: Algorithm::SlidingWindow {
                max_requests: 50,
                window_seconds: 60,
            },
            block_duration: Duration::minutes(15),
            idle_max_age: Duration::hours(1),
            fail_open: true,
        }
    }
}

impl RateLimiterConfig {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            block_duration: Duration::seconds(settings.block_seconds),
            idle_max_age: Duration::seconds(settings.idle_max_age_seconds),
            fail_open: settings.fail_open,
            ..Self::default()
        }
    }
}

struct KeyRecord {
    state: RecordState,
    /// Tracks request tempo independently of the endpoint rule.
    rapid_state: RecordState,
    last_seen: DateTime<Utc>,
}

pub struct RateLimiter {
    records: DashMap<String, KeyRecord>,
    blocked: DashMap<String, DateTime<Utc>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            records: DashMap::new(),
            blocked: DashMap::new(),
            config,
        }
    }

    fn rule_for(&self, endpoint_class: &str) -> &Algorithm {
        self.config
            .rules
            .get(endpoint_class)
            .unwrap_or(&self.config.default_rule)
    }

    /// Checks and records one request for the key. Concurrent calls for the
    /// same key are serialized by the map entry; the admission bound of the
    /// rule holds under contention.
    pub fn check(&self, key: &RateLimitKey) -> Decision {
        let now = Utc::now();

        if let Some(until) = self.blocked.get(&key.block_key()) {
            if *until > now {
                return Decision {
                    allowed: false,
                    remaining: 0,
                    reset_time: *until,
                    retry_after: Some(*until - now),
                };
            }
        }
        self.blocked.remove(&key.block_key());

        let rule = self.rule_for(&key.endpoint_class);
        let mut entry = self
            .records
            .entry(key.map_key())
            .or_insert_with(|| KeyRecord {
                state: RecordState::for_algorithm(rule, now),
                rapid_state: RecordState::for_algorithm(&self.config.rapid_rule, now),
                last_seen: now,
            });
        entry.last_seen = now;

        let rapid = apply(&self.config.rapid_rule, &mut entry.rapid_state, now);
        if !rapid.allowed {
            let until = now + self.config.block_duration;
            drop(entry);
            self.blocked.insert(key.block_key(), until);
            warn!(
                identifier = %key.identifier,
                endpoint_class = %key.endpoint_class,
                "rapid-fire threshold exceeded, caller flagged"
            );
            return Decision {
                allowed: false,
                remaining: 0,
                reset_time: until,
                retry_after: Some(self.config.block_duration),
            };
        }

        apply(rule, &mut entry.state, now)
    }

    /// `check` with the declared client identity folded in: automation
    /// signatures are flagged before any counter is touched.
    pub fn check_with_agent(&self, key: &RateLimitKey, user_agent: &str) -> Decision {
        if is_automation_signature(user_agent) {
            let until = Utc::now() + self.config.block_duration;
            self.blocked.insert(key.block_key(), until);
            info!(
                identifier = %key.identifier,
                user_agent = %user_agent,
                "automation signature flagged"
            );
        }
        self.check(key)
    }

    /// `check` under a deadline. The in-memory engine effectively always
    /// answers in time, but hosts backed by slower storage get the
    /// configured fail-open policy: a limiter that cannot answer allows the
    /// request instead of denying service.
    pub async fn check_bounded(
        &self,
        key: &RateLimitKey,
        deadline: std::time::Duration,
    ) -> Decision {
        let check = tokio::time::timeout(deadline, async { self.check(key) }).await;
        match check {
            Ok(decision) => decision,
            Err(_) if self.config.fail_open => {
                warn!(
                    identifier = %key.identifier,
                    "rate limiter timed out, failing open"
                );
                Decision {
                    allowed: true,
                    remaining: 0,
                    reset_time: Utc::now(),
                    retry_after: None,
                }
            }
            Err(_) => Decision {
                allowed: false,
                remaining: 0,
                reset_time: Utc::now(),
                retry_after: None,
            },
        }
    }

    /// Drops records idle past the configured max age and expired blocks.
    /// Holds only momentary per-key locks, so concurrent checks against
    /// active keys are not delayed.
    pub fn cleanup(&self) {
        let now = Utc::now();
        let cutoff = now - self.config.idle_max_age;
        self.records.retain(|_, record| record.last_seen > cutoff);
        self.blocked.retain(|_, until| *until > now);
    }

    #[cfg(test)]
    fn record_count(&self) -> usize {
        self.records.len()
    }
}
