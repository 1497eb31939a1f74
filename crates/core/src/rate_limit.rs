//! Per-identity token buckets guarding the upstream model API.
//!
//! Each identity gets a request budget and a model-token budget that refill
//! together when the window elapses. Check and decrement happen under one
//! write lock so concurrent callers for the same identity cannot overspend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub tokens_per_window: u64,
    pub request_burst: u32,
    pub token_burst: u64,
    pub window: Duration,
    pub idle_eviction: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            tokens_per_window: 100_000,
            request_burst: 10,
            token_burst: 0,
            window: Duration::from_secs(60),
            idle_eviction: Duration::from_secs(300),
        }
    }
}

impl RateLimitConfig {
    fn max_requests(&self) -> u32 {
        self.requests_per_window.saturating_add(self.request_burst)
    }

    fn max_tokens(&self) -> u64 {
        self.tokens_per_window.saturating_add(self.token_burst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialReason {
    RequestsExhausted,
    TokensExhausted,
    /// The estimate is larger than a full window's budget and can never fit.
    EstimateTooLarge,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestsExhausted => "request limit reached for this window",
            Self::TokensExhausted => "token budget exhausted for this window",
            Self::EstimateTooLarge => "request is larger than the token budget",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { requests_remaining: u32, tokens_remaining: u64 },
    Denied { reason: DenialReason, retry_after: Duration, reset_at: DateTime<Utc> },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub requests_remaining: u32,
    pub tokens_remaining: u64,
    pub estimated_tokens_used: u64,
    pub burst_allowance: u32,
}

#[derive(Debug)]
struct RateLimitBucket {
    requests_remaining: u32,
    tokens_remaining: u64,
    window_start: Instant,
    burst_allowance: u32,
    estimated_tokens_used: u64,
    last_seen: Instant,
}

impl RateLimitBucket {
    fn fresh(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            requests_remaining: config.max_requests(),
            tokens_remaining: config.max_tokens(),
            window_start: now,
            burst_allowance: config.request_burst,
            estimated_tokens_used: 0,
            last_seen: now,
        }
    }

    fn refill_if_elapsed(&mut self, config: &RateLimitConfig, now: Instant) {
        if now.duration_since(self.window_start) >= config.window {
            self.requests_remaining = config.max_requests();
            self.tokens_remaining = config.max_tokens();
            self.estimated_tokens_used = 0;
            self.window_start = now;
        }
    }

    fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            requests_remaining: self.requests_remaining,
            tokens_remaining: self.tokens_remaining,
            estimated_tokens_used: self.estimated_tokens_used,
            burst_allowance: self.burst_allowance,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<RwLock<HashMap<String, RateLimitBucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Reserves one request and `estimated_tokens` for `identity`, or denies
    /// without consuming anything.
    pub async fn try_consume(&self, identity: &str, estimated_tokens: u64) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(identity.to_string())
            .or_insert_with(|| RateLimitBucket::fresh(&self.config, now));
        bucket.refill_if_elapsed(&self.config, now);
        bucket.last_seen = now;

        let reason = if estimated_tokens > self.config.max_tokens() {
            Some(DenialReason::EstimateTooLarge)
        } else if bucket.requests_remaining == 0 {
            Some(DenialReason::RequestsExhausted)
        } else if bucket.tokens_remaining < estimated_tokens {
            Some(DenialReason::TokensExhausted)
        } else {
            None
        };

        if let Some(reason) = reason {
            let retry_after =
                self.config.window.saturating_sub(now.duration_since(bucket.window_start));
            let reset_at = Utc::now()
                + chrono::Duration::from_std(retry_after).unwrap_or_else(|_| chrono::Duration::zero());
            warn!(
                event_name = "rate_limit.denied",
                identity,
                reason = reason.as_str(),
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "rate limit exceeded"
            );
            return RateLimitDecision::Denied { reason, retry_after, reset_at };
        }

        bucket.requests_remaining -= 1;
        bucket.tokens_remaining -= estimated_tokens;
        bucket.estimated_tokens_used = bucket.estimated_tokens_used.saturating_add(estimated_tokens);
        debug!(
            event_name = "rate_limit.consumed",
            identity,
            requests_remaining = bucket.requests_remaining,
            tokens_remaining = bucket.tokens_remaining,
            "rate limit reservation made"
        );

        RateLimitDecision::Allowed {
            requests_remaining: bucket.requests_remaining,
            tokens_remaining: bucket.tokens_remaining,
        }
    }

    /// Trues up one reservation: credits back what `estimated_tokens` exceeded
    /// the real usage by. Usage above the estimate is never charged, and a
    /// reservation made before the last refill can only credit what is still
    /// outstanding in the current window.
    pub async fn adjust_for_actual_usage(
        &self,
        identity: &str,
        estimated_tokens: u64,
        actual_tokens: u64,
    ) {
        let mut buckets = self.buckets.write().await;
        let Some(bucket) = buckets.get_mut(identity) else {
            return;
        };
        let settled = estimated_tokens.min(bucket.estimated_tokens_used);
        bucket.estimated_tokens_used -= settled;
        let credit = settled.saturating_sub(actual_tokens);
        if credit > 0 {
            bucket.tokens_remaining =
                bucket.tokens_remaining.saturating_add(credit).min(self.config.max_tokens());
            debug!(
                event_name = "rate_limit.adjusted",
                identity,
                credit,
                tokens_remaining = bucket.tokens_remaining,
                "token estimate trued up"
            );
        }
    }

    /// Drops buckets untouched for the idle period. Returns how many went.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle = self.config.idle_eviction;
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) < idle);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(event_name = "rate_limit.evicted", evicted, "idle rate limit buckets evicted");
        }
        evicted
    }

    pub async fn snapshot(&self, identity: &str) -> Option<BucketSnapshot> {
        self.buckets.read().await.get(identity).map(RateLimitBucket::snapshot)
    }

    pub async fn tracked_identities(&self) -> usize {
        self.buckets.read().await.len()
    }
}
