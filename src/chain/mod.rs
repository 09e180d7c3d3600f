//! Filter Chain Runtime (C16): runs a fixed, globally-ordered sequence of
//! filters over one request, short-circuiting on the first non-proceed
//! decision (spec.md §4.16). The per-route differences the spec also
//! calls out (request/response header rewrites, path rewrites) are *not*
//! modeled as chain filters — they are plain data on `CompiledRoute`
//! applied directly by the dispatcher via [`crate::rewrite`], since they
//! never short-circuit and never need the access-control/rate-limit
//! ordering guarantees a `Filter` provides.
//!
//! Global order, per spec.md §2's data flow (`C4 → C6 → C9 → C7`):
//! JWT Validator, Client Access Control, Request-Body Validator, Rate
//! Limiter. Each filter consults the route's own compiled configuration
//! to decide whether it has anything to do for this particular route.

use crate::access::filter::check_client_access;
use crate::access::merger::ClientAccessStore;
use crate::atomic_store::AtomicStore;
use crate::error::GatewayError;
use crate::jwt::{self, JwtValidatorConfig, ValidatedIdentity};
use crate::keys::KeyCache;
use crate::metrics::MetricsCollector;
use crate::ratelimit::resolvers::{resolve_key, ResolveContext};
use crate::ratelimit::RateLimiter;
use crate::route::compile::CompiledRoute;
use crate::validate::validate_body;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Everything a filter may read or contribute to for one request. Owned
/// by the dispatcher for the lifetime of one request's chain run.
pub struct FilterContext<'a> {
    pub route: &'a CompiledRoute,
    pub method: &'a http::Method,
    pub path: &'a str,
    pub headers: &'a http::HeaderMap,
    pub socket_addr: Option<IpAddr>,
    pub body: &'a [u8],
    /// Headers later filters or the dispatcher add to the upstream
    /// request (e.g. `user-id`, `scope`, rate-limit remaining).
    pub upstream_headers: HashMap<String, String>,
    /// Set by [`JwtFilter`]; read by [`AccessControlFilter`] and anything
    /// downstream that needs the caller's claims or resolved scopes.
    pub identity: Option<ValidatedIdentity>,
    /// Set by [`AccessControlFilter`] on success, for access-log/upstream
    /// propagation.
    pub client_id: Option<String>,
}

/// One filter's verdict: continue to the next filter, or short-circuit
/// the chain with the given error response. C10's pre-commit hook still
/// fires on a `Respond` outcome — that is the dispatcher's job, not the
/// chain's.
pub enum FilterOutcome {
    Proceed,
    Respond(GatewayError),
}

#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, ctx: &mut FilterContext<'_>) -> FilterOutcome;
}

/// The fixed, ordered chain run for every request (spec.md §4.16).
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Runs every filter in order; the first `Respond` short-circuits the
    /// rest.
    pub async fn run(&self, ctx: &mut FilterContext<'_>) -> Result<(), GatewayError> {
        for filter in &self.filters {
            match filter.apply(ctx).await {
                FilterOutcome::Proceed => {}
                FilterOutcome::Respond(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// JWT Validator (C4) as a chain filter.
pub struct JwtFilter {
    pub key_cache: KeyCache,
    pub config: JwtValidatorConfig,
}

#[async_trait]
impl Filter for JwtFilter {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn apply(&self, ctx: &mut FilterContext<'_>) -> FilterOutcome {
        let auth = ctx
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match jwt::validate(auth, &self.key_cache, &ctx.route.scopes, &self.config) {
            Ok(identity) => {
                ctx.upstream_headers.extend(identity.headers.clone());
                ctx.identity = Some(identity);
                FilterOutcome::Proceed
            }
            Err(e) => FilterOutcome::Respond(e),
        }
    }
}

/// Client Access Control Filter (C6) as a chain filter.
pub struct AccessControlFilter {
    pub store: ClientAccessStore,
    pub claim_names: Vec<String>,
    pub enabled: bool,
}

#[async_trait]
impl Filter for AccessControlFilter {
    fn name(&self) -> &'static str {
        "access-control"
    }

    async fn apply(&self, ctx: &mut FilterContext<'_>) -> FilterOutcome {
        if !self.enabled {
            return FilterOutcome::Proceed;
        }
        let empty = serde_json::Map::new();
        let claims = ctx.identity.as_ref().map(|i| &i.claims).unwrap_or(&empty);
        match check_client_access(claims, &self.claim_names, ctx.path, &self.store) {
            Ok(client_id) => {
                ctx.client_id = Some(client_id);
                FilterOutcome::Proceed
            }
            Err(e) => FilterOutcome::Respond(e),
        }
    }
}

/// Request-Body Validator (C9) as a chain filter. A no-op for routes
/// without a `SchemaValidator` metadata entry (`ctx.route.compiled_schema
/// == None`).
pub struct BodyValidatorFilter;

#[async_trait]
impl Filter for BodyValidatorFilter {
    fn name(&self) -> &'static str {
        "body-validator"
    }

    async fn apply(&self, ctx: &mut FilterContext<'_>) -> FilterOutcome {
        match &ctx.route.compiled_schema {
            Some(schema) => match validate_body(schema, ctx.body) {
                Ok(()) => FilterOutcome::Proceed,
                Err(e) => FilterOutcome::Respond(e),
            },
            None => FilterOutcome::Proceed,
        }
    }
}

/// Rate Limiter (C7) as a chain filter, keyed via the Key Resolver
/// Registry (C8) result already resolved into `ctx.route.key_resolver`
/// at compile time.
pub struct RateLimitFilter<S: AtomicStore> {
    pub limiter: RateLimiter<S>,
    pub metrics: Arc<dyn MetricsCollector>,
}

#[async_trait]
impl<S: AtomicStore + 'static> Filter for RateLimitFilter<S> {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn apply(&self, ctx: &mut FilterContext<'_>) -> FilterOutcome {
        let resolve_ctx = ResolveContext {
            headers: ctx.headers,
            socket_addr: ctx.socket_addr,
            route_id: &ctx.route.id,
            path: ctx.path,
        };
        let key = match resolve_key(&ctx.route.key_resolver, &resolve_ctx) {
            Some(key) => key,
            // spec.md §4.8: no resolvable key means the check is skipped.
            None => return FilterOutcome::Proceed,
        };

        match self.limiter.check(&key, &ctx.route.rate_limit).await {
            Ok(outcome) => {
                self.metrics.record_rate_limit(&ctx.route.id, false);
                ctx.upstream_headers
                    .insert("x-ratelimit-remaining".to_string(), outcome.remaining.to_string());
                ctx.upstream_headers.insert(
                    "x-ratelimit-burst-capacity".to_string(),
                    outcome.burst_capacity.to_string(),
                );
                FilterOutcome::Proceed
            }
            Err(e) => {
                self.metrics.record_rate_limit(&ctx.route.id, true);
                FilterOutcome::Respond(e)
            }
        }
    }
}
