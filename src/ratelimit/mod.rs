//! Rate Limiter (C7): token-bucket admission control backed by the
//! shared [`crate::atomic_store::AtomicStore`], keyed via the Key
//! Resolver Registry (C8, [`resolvers`]).

pub mod resolvers;

use crate::atomic_store::{AtomicStore, AtomicStoreError, TokenBucketRequest};
use crate::error::GatewayError;
use crate::registry::model::RateLimitConfig;
use chrono::Utc;
use tracing::warn;

/// What the filter chain (C16) needs to set response headers and decide
/// whether to proceed.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: i64,
    pub burst_capacity: u32,
}

pub struct RateLimiter<S: AtomicStore> {
    store: S,
}

impl<S: AtomicStore> RateLimiter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Checks and, on success, consumes tokens for one request. `key` is
    /// the value the resolver (C8) produced for this request; `config` is
    /// the route's resolved rate-limit settings (spec.md §4.7).
    ///
    /// Store errors fail open: the request is allowed and a warning is
    /// logged, per spec.md §4.7's explicit "fail open on store
    /// unavailability" behavior.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitOutcome, GatewayError> {
        let tokens_key = format!("{}:{}:tokens", config.namespace, key);
        let timestamp_key = format!("{}:{}:ts", config.namespace, key);

        let result = self
            .store
            .eval_token_bucket(TokenBucketRequest {
                tokens_key: &tokens_key,
                timestamp_key: &timestamp_key,
                rate: config.replenish_rate,
                capacity: config.burst_capacity,
                now_millis: Utc::now().timestamp_millis(),
                requested: config.requested_tokens,
            })
            .await;

        match result {
            Ok(outcome) => {
                if outcome.allowed {
                    Ok(RateLimitOutcome {
                        allowed: true,
                        remaining: outcome.tokens_left,
                        burst_capacity: config.burst_capacity,
                    })
                } else {
                    Err(GatewayError::rate_limited("rate limit exceeded")
                        .with_header("x-ratelimit-remaining", outcome.tokens_left.to_string())
                        .with_header("x-ratelimit-burst-capacity", config.burst_capacity.to_string()))
                }
            }
            Err(AtomicStoreError::Transport(reason)) => {
                warn!(namespace = %config.namespace, key, reason, "rate limit store unavailable, failing open");
                Ok(RateLimitOutcome {
                    allowed: true,
                    remaining: config.burst_capacity as i64,
                    burst_capacity: config.burst_capacity,
                })
            }
        }
    }

    /// TTL the spec assigns to a bucket's backing keys: `ceil(capacity /
    /// rate) * 2` seconds (spec.md §4.7). Exposed so callers constructing
    /// their own store keys can match the script's expiry.
    pub fn ttl_seconds(config: &RateLimitConfig) -> u64 {
        let capacity = config.burst_capacity.max(1) as u64;
        let rate = config.replenish_rate.max(1) as u64;
        capacity.div_ceil(rate) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic_store::InMemoryAtomicStore;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            replenish_rate: 1,
            burst_capacity: 1,
            requested_tokens: 1,
            key_resolver_name: "client-ip".to_string(),
            namespace: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn first_request_allowed_second_denied() {
        let limiter = RateLimiter::new(InMemoryAtomicStore::new());
        let cfg = config();
        let first = limiter.check("client-a", &cfg).await.unwrap();
        assert!(first.allowed);

        let err = limiter.check("client-a", &cfg).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn denial_carries_remaining_and_burst_capacity_headers() {
        let limiter = RateLimiter::new(InMemoryAtomicStore::new());
        let cfg = config();
        limiter.check("client-a", &cfg).await.unwrap();
        let err = limiter.check("client-a", &cfg).await.unwrap_err();
        assert_eq!(
            err.headers.iter().find(|(n, _)| *n == "x-ratelimit-remaining").map(|(_, v)| v.as_str()),
            Some("0")
        );
        assert_eq!(
            err.headers
                .iter()
                .find(|(n, _)| *n == "x-ratelimit-burst-capacity")
                .map(|(_, v)| v.as_str()),
            Some("1")
        );
    }

    #[tokio::test]
    async fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(InMemoryAtomicStore::new());
        let cfg = config();
        assert!(limiter.check("client-a", &cfg).await.unwrap().allowed);
        assert!(limiter.check("client-b", &cfg).await.unwrap().allowed);
    }

    #[test]
    fn ttl_seconds_matches_spec_formula() {
        let cfg = RateLimitConfig {
            replenish_rate: 3,
            burst_capacity: 10,
            requested_tokens: 1,
            key_resolver_name: "client-ip".to_string(),
            namespace: "default".to_string(),
        };
        assert_eq!(RateLimiter::<InMemoryAtomicStore>::ttl_seconds(&cfg), 8);
    }
}
