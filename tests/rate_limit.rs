use std::sync::Arc;

use chrono::Duration;
use credguard::rate_limit::Algorithm;
use credguard::{RateLimitKey, RateLimiter, RateLimiterConfig};

fn limiter_with_rule(name: &str, algorithm: Algorithm) -> RateLimiter {
    let mut config = RateLimiterConfig::default();
    config.rules.insert(name.to_string(), algorithm);
    RateLimiter::new(config)
}

#[tokio::test]
async fn test_sliding_window_scenario() {
    // SlidingWindow(max=3, window=60s): three requests pass, the fourth is
    // denied with a positive retry hint.
    let limiter = limiter_with_rule(
        "login",
        Algorithm::SlidingWindow {
            max_requests: 3,
            window_seconds: 60,
        },
    );
    let key = RateLimitKey::ip("login", "192.168.1.10");

    for _ in 0..3 {
        assert!(limiter.check(&key).allowed);
    }

    let denied = limiter.check(&key);
    assert!(!denied.allowed);
    assert!(denied.retry_after.unwrap() > Duration::zero());
    assert!(denied.retry_after.unwrap() <= Duration::seconds(60));
}

#[tokio::test]
async fn test_token_bucket_scenario() {
    // TokenBucket(capacity=5, refill=10s): five immediate requests pass,
    // the sixth is denied, and ~2s of refill admits exactly one more.
    let limiter = limiter_with_rule(
        "api_burst",
        Algorithm::TokenBucket {
            capacity: 5,
            refill_window_seconds: 10,
            burst: 0,
        },
    );
    let key = RateLimitKey::user("api_burst", "user-42");

    for _ in 0..5 {
        assert!(limiter.check(&key).allowed);
    }
    assert!(!limiter.check(&key).allowed);

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    assert!(limiter.check(&key).allowed);
    assert!(!limiter.check(&key).allowed);
}

#[tokio::test]
async fn test_concurrent_admission_bound() {
    // N concurrent checks never admit more than max within one window.
    let limiter = Arc::new(limiter_with_rule(
        "login",
        Algorithm::SlidingWindow {
            max_requests: 15,
            window_seconds: 300,
        },
    ));

    let mut handles = Vec::new();
    for worker in 0..8 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            let mut admitted = 0u32;
            for _ in 0..10 {
                let key = RateLimitKey::ip("login", "10.1.1.1");
                if limiter.check(&key).allowed {
                    admitted += 1;
                }
                if worker % 2 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            admitted
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 15, "80 concurrent checks must admit exactly max");
}

#[tokio::test]
async fn test_fixed_window_denies_until_boundary() {
    let limiter = limiter_with_rule(
        "register",
        Algorithm::FixedWindow {
            max_requests: 2,
            window_seconds: 3600,
        },
    );
    let key = RateLimitKey::ip("register", "172.16.0.1");

    assert!(limiter.check(&key).allowed);
    assert!(limiter.check(&key).allowed);

    let denied = limiter.check(&key);
    assert!(!denied.allowed);
    // The retry hint points at the calendar-aligned window end.
    assert!(denied.retry_after.unwrap() <= Duration::seconds(3600));
}

#[tokio::test]
async fn test_flagged_caller_gets_extended_denial() {
    let mut config = RateLimiterConfig::default();
    config.rapid_rule = Algorithm::SlidingWindow {
        max_requests: 3,
        window_seconds: 60,
    };
    config.default_rule = Algorithm::SlidingWindow {
        max_requests: 100,
        window_seconds: 60,
    };
    config.block_duration = Duration::minutes(30);
    let limiter = RateLimiter::new(config);
    let key = RateLimitKey::ip("anything", "203.0.113.7");

    for _ in 0..3 {
        assert!(limiter.check(&key).allowed);
    }

    let flagged = limiter.check(&key);
    assert!(!flagged.allowed);
    // Far longer than any ordinary rule denial.
    assert!(flagged.retry_after.unwrap() > Duration::minutes(29));
}

#[tokio::test]
async fn test_rate_limiter_shared_across_tasks() {
    // One limiter instance shared by reference; unrelated keys proceed
    // while a hot key is throttled.
    let limiter = Arc::new(limiter_with_rule(
        "login",
        Algorithm::SlidingWindow {
            max_requests: 1,
            window_seconds: 60,
        },
    ));

    assert!(limiter.check(&RateLimitKey::ip("login", "10.2.2.2")).allowed);
    assert!(!limiter.check(&RateLimitKey::ip("login", "10.2.2.2")).allowed);

    let other = limiter.clone();
    let handle = tokio::spawn(async move {
        other.check(&RateLimitKey::ip("login", "10.3.3.3")).allowed
    });
    assert!(handle.await.unwrap());
}
