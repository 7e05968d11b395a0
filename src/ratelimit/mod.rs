//! Sliding-window admission control.
//!
//! Each `(identifier, endpoint)` key holds the timestamps of its admitted
//! requests. A check prunes timestamps older than the window, admits the
//! request only if fewer than `max_requests` remain, and refreshes the key's
//! expiry, all in one backend call. Backend failures fail open.

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The caller is over its limit. Raised at the request boundary only.
    #[error("rate limit exceeded: {limit} requests per window, resets at {reset_at}")]
    Exceeded { limit: u64, reset_at: u64 },

    /// The counter backend could not be reached.
    #[error("rate limit backend unavailable: {0}")]
    Backend(String),
}

/// Limit for one key: at most `max_requests` in any `window_ms` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u64,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    #[default]
    Standard,
    Premium,
    Enterprise,
}

impl fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateLimitTier::Standard => "standard",
            RateLimitTier::Premium => "premium",
            RateLimitTier::Enterprise => "enterprise",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RateLimitTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(RateLimitTier::Standard),
            "premium" => Ok(RateLimitTier::Premium),
            "enterprise" => Ok(RateLimitTier::Enterprise),
            other => Err(format!("unknown rate limit tier: {}", other)),
        }
    }
}

/// Per-tier rules. Defaults: 100, 1000 and 10000 requests per minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRules {
    pub standard: RateLimitRule,
    pub premium: RateLimitRule,
    pub enterprise: RateLimitRule,
}

impl TierRules {
    pub fn rule(&self, tier: RateLimitTier) -> RateLimitRule {
        match tier {
            RateLimitTier::Standard => self.standard,
            RateLimitTier::Premium => self.premium,
            RateLimitTier::Enterprise => self.enterprise,
        }
    }

    /// Same rule for every tier.
    pub fn uniform(rule: RateLimitRule) -> Self {
        Self {
            standard: rule,
            premium: rule,
            enterprise: rule,
        }
    }
}

impl Default for TierRules {
    fn default() -> Self {
        Self {
            standard: RateLimitRule::new(100, 60_000),
            premium: RateLimitRule::new(1_000, 60_000),
            enterprise: RateLimitRule::new(10_000, 60_000),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// `u64::MAX` when the limiter failed open.
    pub remaining: u64,
    pub limit: u64,
    /// Epoch milliseconds at which the oldest counted request leaves the window.
    pub reset_at: u64,
}

impl RateLimitDecision {
    /// Convert a rejection into an error for the boundary layer.
    pub fn into_result(self) -> Result<Self, RateLimitError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitError::Exceeded {
                limit: self.limit,
                reset_at: self.reset_at,
            })
        }
    }
}

/// State of a key's window right after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub admitted: bool,
    /// Requests counted in the window, including this one if admitted.
    pub count: u64,
    /// Oldest timestamp still in the window.
    pub oldest_ms: Option<u64>,
}

/// Counter store. `hit` must prune, admit and refresh atomically per key.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    async fn hit(
        &self,
        key: &str,
        now_ms: u64,
        rule: RateLimitRule,
    ) -> Result<WindowState, RateLimitError>;

    /// Drop keys whose expiry has passed. Returns how many were removed.
    async fn purge_expired(&self, now_ms: u64) -> Result<usize, RateLimitError>;
}

pub struct RateLimiter {
    backend: Arc<dyn CounterBackend>,
    rules: TierRules,
    /// Server-side tier assignments. Unlisted clients are `Standard`.
    client_tiers: HashMap<String, RateLimitTier>,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn CounterBackend>, rules: TierRules) -> Self {
        Self {
            backend,
            rules,
            client_tiers: HashMap::new(),
        }
    }

    /// Assign tiers to known client identifiers.
    pub fn with_client_tiers<I, S>(mut self, tiers: I) -> Self
    where
        I: IntoIterator<Item = (S, RateLimitTier)>,
        S: Into<String>,
    {
        self.client_tiers
            .extend(tiers.into_iter().map(|(client, tier)| (client.into(), tier)));
        self
    }

    /// Tier granted to `identifier`.
    pub fn tier_for(&self, identifier: &str) -> RateLimitTier {
        self.client_tiers
            .get(identifier)
            .copied()
            .unwrap_or_default()
    }

    /// In-memory limiter with the default tier rules.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), TierRules::default())
    }

    pub fn rules(&self) -> &TierRules {
        &self.rules
    }

    /// Check a request against its tier's rule.
    pub async fn check(
        &self,
        identifier: &str,
        endpoint: &str,
        tier: RateLimitTier,
    ) -> RateLimitDecision {
        self.check_rule(identifier, endpoint, self.rules.rule(tier))
            .await
    }

    /// Check a request against an explicit rule.
    pub async fn check_rule(
        &self,
        identifier: &str,
        endpoint: &str,
        rule: RateLimitRule,
    ) -> RateLimitDecision {
        self.check_at(identifier, endpoint, rule, now_ms()).await
    }

    async fn check_at(
        &self,
        identifier: &str,
        endpoint: &str,
        rule: RateLimitRule,
        now: u64,
    ) -> RateLimitDecision {
        let key = format!("{}:{}", identifier, endpoint);

        match self.backend.hit(&key, now, rule).await {
            Ok(state) => {
                let reset_at = state.oldest_ms.unwrap_or(now) + rule.window_ms;
                let decision = RateLimitDecision {
                    allowed: state.admitted,
                    remaining: rule.max_requests.saturating_sub(state.count),
                    limit: rule.max_requests,
                    reset_at,
                };
                if !decision.allowed {
                    debug!(key = %key, limit = rule.max_requests, "request rejected");
                }
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, "rate limiter failing open");
                RateLimitDecision {
                    allowed: true,
                    remaining: u64::MAX,
                    limit: rule.max_requests,
                    reset_at: now + rule.window_ms,
                }
            }
        }
    }

    pub async fn purge_expired(&self) -> Result<usize, RateLimitError> {
        self.backend.purge_expired(now_ms()).await
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
