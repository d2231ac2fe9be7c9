//! Throttling algorithms and their per-key record state.

use chrono::{DateTime, Duration, Utc};

use crate::error::RateLimitError;

/// Algorithm plus parameters for one named rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Algorithm {
    SlidingWindow {
        max_requests: u32,
        window_seconds: i64,
    },
    FixedWindow {
        max_requests: u32,
        window_seconds: i64,
    },
    TokenBucket {
        capacity: u32,
        refill_window_seconds: i64,
        burst: u32,
    },
}

/// Mutable per-key state. Window algorithms keep ordered timestamps; the
/// token bucket keeps a fractional token count and its last refill instant.
#[derive(Debug, Clone)]
pub enum RecordState {
    Window { timestamps: Vec<DateTime<Utc>> },
    Bucket { tokens: f64, last_refill: DateTime<Utc> },
}

impl RecordState {
    pub fn for_algorithm(algorithm: &Algorithm, now: DateTime<Utc>) -> Self {
        match algorithm {
            Algorithm::SlidingWindow { .. } | Algorithm::FixedWindow { .. } => RecordState::Window {
                timestamps: Vec::new(),
            },
            Algorithm::TokenBucket {
                capacity, burst, ..
            } => RecordState::Bucket {
                tokens: (*capacity + *burst) as f64,
                last_refill: now,
            },
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub retry_after: Option<Duration>,
}

impl Decision {
    fn allowed(remaining: u32, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time,
            retry_after: None,
        }
    }

    fn denied(reset_time: DateTime<Utc>, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time,
            retry_after: Some(std::cmp::max(retry_after, Duration::zero())),
        }
    }

    /// Maps a denial to the typed error carrying the retry hint, for
    /// callers that propagate results instead of inspecting decisions.
    pub fn as_result(&self) -> Result<(), RateLimitError> {
        if self.allowed {
            Ok(())
        } else {
            Err(RateLimitError::Exceeded {
                retry_after_seconds: self
                    .retry_after
                    .map(|d| d.num_seconds().max(1))
                    .unwrap_or(1),
            })
        }
    }
}

/// Applies one request to the record under `algorithm`, mutating the state
/// and returning the decision. The caller holds the per-key guard, so this
/// runs serialized relative to other requests on the same key.
pub fn apply(algorithm: &Algorithm, state: &mut RecordState, now: DateTime<Utc>) -> Decision {
    match (algorithm, state) {
        (
            Algorithm::SlidingWindow {
                max_requests,
                window_seconds,
            },
            RecordState::Window { timestamps },
        ) => {
            let window = Duration::seconds(*window_seconds);
            let cutoff = now - window;
            timestamps.retain(|ts| *ts > cutoff);

            if (timestamps.len() as u32) < *max_requests {
                timestamps.push(now);
                let oldest = timestamps[0];
                Decision::allowed(*max_requests - timestamps.len() as u32, oldest + window)
            } else {
                let oldest = timestamps[0];
                Decision::denied(oldest + window, oldest + window - now)
            }
        }
        (
            Algorithm::FixedWindow {
                max_requests,
                window_seconds,
            },
            RecordState::Window { timestamps },
        ) => {
            let boundary_secs = now.timestamp().div_euclid(*window_seconds) * *window_seconds;
            let boundary = DateTime::from_timestamp(boundary_secs, 0).unwrap_or(now);
            let window_end = boundary + Duration::seconds(*window_seconds);
            timestamps.retain(|ts| *ts >= boundary);

            if (timestamps.len() as u32) < *max_requests {
                timestamps.push(now);
                Decision::allowed(*max_requests - timestamps.len() as u32, window_end)
            } else {
                Decision::denied(window_end, window_end - now)
            }
        }
        (
            Algorithm::TokenBucket {
                capacity,
                refill_window_seconds,
                burst,
            },
            RecordState::Bucket { tokens, last_refill },
        ) => {
            let rate = *capacity as f64 / *refill_window_seconds as f64;
            let elapsed = (now - *last_refill).num_milliseconds() as f64 / 1000.0;
            let cap = (*capacity + *burst) as f64;

            *tokens = (*tokens + elapsed * rate).min(cap);
            *last_refill = now;

            let seconds_per_token = 1.0 / rate;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                let refill_full = Duration::milliseconds(((cap - *tokens) * seconds_per_token * 1000.0) as i64);
                Decision::allowed(tokens.floor() as u32, now + refill_full)
            } else {
                let wait =
                    Duration::milliseconds(((1.0 - *tokens) * seconds_per_token * 1000.0).ceil() as i64);
                Decision::denied(now + wait, wait)
            }
        }
        // A key's state always matches its rule's algorithm; reaching this
        // arm means the record was created under a different rule and must
        // be rebuilt by the caller.
        (algorithm, state) => {
            *state = RecordState::for_algorithm(algorithm, now);
            apply(algorithm, state, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_window_allows_then_denies() {
        let algorithm = Algorithm::SlidingWindow {
            max_requests: 3,
            window_seconds: 60,
        };
        let now = Utc::now();
        let mut state = RecordState::for_algorithm(&algorithm, now);

        for _ in 0..3 {
            assert!(apply(&algorithm, &mut state, now).allowed);
        }

        let denied = apply(&algorithm, &mut state, now);
        assert!(!denied.allowed);
        assert!(denied.retry_after.unwrap() > Duration::zero());
    }

    #[test]
    fn test_sliding_window_ages_out_oldest() {
        let algorithm = Algorithm::SlidingWindow {
            max_requests: 3,
            window_seconds: 60,
        };
        let start = Utc::now();
        let mut state = RecordState::for_algorithm(&algorithm, start);

        for _ in 0..3 {
            apply(&algorithm, &mut state, start);
        }
        assert!(!apply(&algorithm, &mut state, start).allowed);

        // Once the oldest timestamp leaves the window, one slot opens.
        let later = start + Duration::seconds(61);
        assert!(apply(&algorithm, &mut state, later).allowed);
    }

    #[test]
    fn test_fixed_window_resets_at_boundary() {
        let algorithm = Algorithm::FixedWindow {
            max_requests: 2,
            window_seconds: 60,
        };
        // Pin to a known boundary so the test is deterministic.
        let start = DateTime::from_timestamp(1_700_000_040, 0).unwrap();
        let mut state = RecordState::for_algorithm(&algorithm, start);

        assert!(apply(&algorithm, &mut state, start).allowed);
        assert!(apply(&algorithm, &mut state, start).allowed);
        let denied = apply(&algorithm, &mut state, start);
        assert!(!denied.allowed);
        // Boundary is 1_700_000_040 (divisible by 60); window ends 60s later.
        assert_eq!(denied.retry_after.unwrap(), Duration::seconds(60));

        let next_window = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        assert!(apply(&algorithm, &mut state, next_window).allowed);
    }

    #[test]
    fn test_token_bucket_burst_then_refill() {
        let algorithm = Algorithm::TokenBucket {
            capacity: 5,
            refill_window_seconds: 10,
            burst: 0,
        };
        let start = Utc::now();
        let mut state = RecordState::for_algorithm(&algorithm, start);

        for _ in 0..5 {
            assert!(apply(&algorithm, &mut state, start).allowed);
        }
        assert!(!apply(&algorithm, &mut state, start).allowed);

        // 2 seconds at 0.5 tokens/s refills one token: exactly one more
        // request goes through.
        let later = start + Duration::seconds(2);
        assert!(apply(&algorithm, &mut state, later).allowed);
        assert!(!apply(&algorithm, &mut state, later).allowed);
    }

    #[test]
    fn test_token_bucket_caps_at_capacity_plus_burst() {
        let algorithm = Algorithm::TokenBucket {
            capacity: 2,
            refill_window_seconds: 1,
            burst: 1,
        };
        let start = Utc::now();
        let mut state = RecordState::for_algorithm(&algorithm, start);

        // A long idle period must not accumulate more than capacity + burst.
        let later = start + Duration::hours(1);
        for _ in 0..3 {
            assert!(apply(&algorithm, &mut state, later).allowed);
        }
        assert!(!apply(&algorithm, &mut state, later).allowed);
    }

    #[test]
    fn test_token_bucket_retry_after_approximates_one_token() {
        let algorithm = Algorithm::TokenBucket {
            capacity: 5,
            refill_window_seconds: 10,
            burst: 0,
        };
        let start = Utc::now();
        let mut state = RecordState::for_algorithm(&algorithm, start);

        for _ in 0..5 {
            apply(&algorithm, &mut state, start);
        }
        let denied = apply(&algorithm, &mut state, start);
        let retry = denied.retry_after.unwrap();
        // One token takes refill_window / capacity = 2s.
        assert!(retry > Duration::seconds(1) && retry <= Duration::seconds(2));
    }
}
