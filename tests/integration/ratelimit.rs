//! Rate limiter integration tests against the wall clock.

use overseer::ratelimit::{MemoryBackend, RateLimitRule};
use overseer::testing::UnavailableBackend;
use overseer::{RateLimitTier, RateLimiter, TierRules};
use std::sync::Arc;
use std::time::Duration;

fn limiter(max_requests: u64, window_ms: u64) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(
        Arc::new(MemoryBackend::new()),
        TierRules::uniform(RateLimitRule::new(max_requests, window_ms)),
    ))
}

/// Test: request N+1 inside the window is rejected; the window then recovers.
#[tokio::test]
async fn test_limit_and_recovery() {
    let limiter = limiter(3, 200);

    for expected_remaining in [2, 1, 0] {
        let d = limiter
            .check("client-a", "/api/missions", RateLimitTier::Standard)
            .await;
        assert!(d.allowed);
        assert_eq!(d.remaining, expected_remaining);
        assert_eq!(d.limit, 3);
    }

    let rejected = limiter
        .check("client-a", "/api/missions", RateLimitTier::Standard)
        .await;
    assert!(!rejected.allowed);
    assert!(rejected.into_result().is_err());

    tokio::time::sleep(Duration::from_millis(250)).await;

    let recovered = limiter
        .check("client-a", "/api/missions", RateLimitTier::Standard)
        .await;
    assert!(recovered.allowed);
    assert_eq!(recovered.remaining, 2);
}

/// Test: concurrent callers never get more than the limit admitted.
#[tokio::test]
async fn test_concurrent_admission_is_exact() {
    let limiter = limiter(10, 60_000);

    let mut handles = Vec::new();
    for _ in 0..40 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter
                .check("burst", "/api/tasks", RateLimitTier::Standard)
                .await
                .allowed
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

/// Test: tiers map to their own limits.
#[tokio::test]
async fn test_tier_limits() {
    let limiter = RateLimiter::in_memory();

    let standard = limiter
        .check("c", "/api/tasks", RateLimitTier::Standard)
        .await;
    let premium = limiter.check("c", "/api/x", RateLimitTier::Premium).await;
    let enterprise = limiter
        .check("c", "/api/y", RateLimitTier::Enterprise)
        .await;

    assert_eq!(standard.limit, 100);
    assert_eq!(premium.limit, 1_000);
    assert_eq!(enterprise.limit, 10_000);
    assert_eq!(standard.remaining, 99);
}

/// Test: an unreachable backend admits everything.
#[tokio::test]
async fn test_backend_outage_fails_open() {
    let limiter = RateLimiter::new(
        Arc::new(UnavailableBackend),
        TierRules::uniform(RateLimitRule::new(1, 60_000)),
    );

    for _ in 0..5 {
        let d = limiter
            .check("client", "/api/missions", RateLimitTier::Standard)
            .await;
        assert!(d.allowed);
        assert_eq!(d.remaining, u64::MAX);
    }
}
