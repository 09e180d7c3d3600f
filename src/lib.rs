//! API Gateway
//!
//! The dataplane half of a two-tier HTTP API fabric: a Registry stores
//! route, rate-limit, and client-access-control configuration; this
//! Gateway resolves, authenticates, rate-limits, and dispatches requests
//! against it, staying in sync via a debounced pub/sub channel with a
//! polling fallback.
//!
//! ## Composition
//!
//! [`Gateway::build_with`] wires the sixteen components spec.md's system
//! overview names into one request dispatcher and three background
//! tasks (route refresh, event subscription, fallback scheduling), the
//! way a startup-phase composition root replaces framework-level
//! dependency injection (spec.md §9).
//!
//! ## Example
//!
//! ```rust,no_run
//! use api_gateway::config::GatewayConfig;
//! use api_gateway::Gateway;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GatewayConfig::default();
//!     let gateway = Gateway::build(config).await.unwrap();
//!     gateway.start().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod access;
pub mod accesslog;
pub mod atomic_store;
pub mod chain;
pub mod circuit;
pub mod config;
pub mod error;
pub mod events;
pub mod jwt;
pub mod keys;
pub mod metrics;
pub mod proxy;
pub mod pubsub;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod rewrite;
pub mod route;
pub mod rules;
pub mod validate;

use access::merger::ClientAccessStore;
use accesslog::{AccessLogEntry, AccessLogFilter};
use atomic_store::{AtomicStore, InMemoryAtomicStore, RedisAtomicStore};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router as AxumRouter,
};
use chain::{AccessControlFilter, BodyValidatorFilter, Filter, FilterChain, FilterContext, JwtFilter, RateLimitFilter};
use circuit::CircuitBreaker;
use config::GatewayConfig;
use dashmap::DashMap;
use error::GatewayError;
use events::{EventPublisher, EventSubscriber, FallbackScheduler};
use http_body_util::BodyExt;
use keys::KeyCache;
use metrics::MetricsCollector;
use proxy::ProxyClient;
use pubsub::{InMemoryPubSub, PubSub, RedisPubSub};
use ratelimit::RateLimiter;
use registry::client::{HttpRegistryClient, InMemoryRegistryClient, RegistryClient};
use route::table::RouteTable;
use route::refresh::RouteRefreshService;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Top-level composition-root error: a failure constructing or starting
/// the Gateway process. Distinct from [`GatewayError`], which is a
/// per-request failure already mapped to an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum GatewayInitError {
    /// Startup-time configuration validation failed (spec.md §7: fatal,
    /// must abort process start).
    #[error("configuration error: {0}")]
    Config(#[from] error::ConfigError),
    /// Failed to connect to the shared substrate (Redis) or bind the
    /// listening socket.
    #[error("initialization error: {0}")]
    Init(String),
    /// The HTTP server itself failed.
    #[error("server error: {0}")]
    Server(String),
}

/// Everything one inbound request's dispatch needs, shared (behind
/// `Arc`s and lock-free readers) across every request. `Clone` is cheap:
/// every field is itself a handle. Implemented by hand rather than
/// derived — `#[derive(Clone)]` would add spurious `R: Clone, P: Clone`
/// bounds even though `R`/`P` only ever appear wrapped in `Arc`.
pub struct GatewayState<R: RegistryClient, P: PubSub> {
    config: Arc<GatewayConfig>,
    route_table: Arc<RouteTable>,
    chain: Arc<FilterChain>,
    metrics: Arc<dyn MetricsCollector>,
    proxy: Arc<ProxyClient>,
    circuit_breakers: Arc<DashMap<String, CircuitBreaker>>,
    circuit_breaker_config: circuit::CircuitBreakerConfig,
    route_refresh: Arc<RouteRefreshService<R>>,
    fallback: Arc<FallbackScheduler<R, P>>,
    publisher: Arc<EventPublisher<P>>,
}

impl<R: RegistryClient, P: PubSub> Clone for GatewayState<R, P> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            route_table: Arc::clone(&self.route_table),
            chain: Arc::clone(&self.chain),
            metrics: Arc::clone(&self.metrics),
            proxy: Arc::clone(&self.proxy),
            circuit_breakers: Arc::clone(&self.circuit_breakers),
            circuit_breaker_config: self.circuit_breaker_config.clone(),
            route_refresh: Arc::clone(&self.route_refresh),
            fallback: Arc::clone(&self.fallback),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

/// The assembled Gateway process: request dispatcher plus the background
/// tasks that keep its Route Table (C11) in sync with the Registry.
pub struct Gateway<R: RegistryClient + 'static, P: PubSub + 'static> {
    state: GatewayState<R, P>,
    app: AxumRouter,
    subscriber_handle: Option<tokio::task::JoinHandle<()>>,
    fallback_handle: tokio::task::JoinHandle<()>,
}

impl Gateway<HttpRegistryClient, RedisPubSub> {
    /// Assembles a Gateway wired to real external collaborators: an HTTP
    /// Registry client and a Redis-backed pub/sub + atomic store, chosen
    /// per spec.md §6's recognized `registry`/`redis` options. This is
    /// the path `main` uses; tests and examples typically call
    /// [`Gateway::build_with`] directly with in-memory doubles instead.
    pub async fn build(config: GatewayConfig) -> Result<Self, GatewayInitError> {
        config.validate()?;

        let registry = HttpRegistryClient::new(config.registry.base_url.clone(), config.registry.request_timeout);
        let pubsub = RedisPubSub::connect(&config.redis.url)
            .await
            .map_err(|e| GatewayInitError::Init(e.to_string()))?;
        let store = RedisAtomicStore::connect(&config.redis.url)
            .await
            .map_err(|e| GatewayInitError::Init(e.to_string()))?;

        Gateway::build_with(config, registry, pubsub, store).await
    }
}

impl<R: RegistryClient + 'static, P: PubSub + 'static> Gateway<R, P> {
    /// Assembles a Gateway from already-constructed collaborators. Used
    /// directly by tests (with [`InMemoryRegistryClient`],
    /// [`InMemoryPubSub`], [`InMemoryAtomicStore`]) and by [`Gateway::build`]
    /// for the production Redis/HTTP wiring.
    pub async fn build_with<S: AtomicStore + 'static>(
        config: GatewayConfig,
        registry: R,
        pubsub: P,
        store: S,
    ) -> Result<Self, GatewayInitError> {
        config.validate()?;
        let config = Arc::new(config);

        let metrics: Arc<dyn MetricsCollector> = if config.metrics.enabled {
            Arc::new(
                metrics::prometheus::PrometheusCollector::new(config.metrics.latency_buckets.clone())
                    .map_err(|e| GatewayInitError::Init(e.to_string()))?,
            )
        } else {
            Arc::new(metrics::NoOpCollector)
        };

        // Public-Key Cache (C3): load every configured source concurrently
        // at startup, then keep each on its own refresh interval.
        let key_cache = KeyCache::new();
        let key_http_client = reqwest::Client::new();
        let _ = key_cache.clone().spawn_refresh_tasks(
            config.jwt.key_sources.clone(),
            key_http_client,
            Arc::clone(&metrics),
        );

        // Client Access Control (C5): merge persisted Registry rows with
        // static overrides; re-merge whenever either input changes. At
        // startup there is no persisted snapshot yet, so seed from
        // overrides only — the Route Refresh Service's Registry round
        // trip (below) does not itself fetch client-access rows in this
        // build (out of C12's scope per spec.md §6); a future poll or
        // `RouteChangeEvent::ClientAccessControlUpdated` handler would
        // call `client_access_store.update` again with a fresh Registry
        // read.
        let client_access_store = ClientAccessStore::new();
        let overrides: Vec<registry::model::ClientAccessConfig> = config
            .client_access_control
            .overrides
            .iter()
            .map(|o| registry::model::ClientAccessConfig {
                client_id: o.client_id.clone(),
                tenant: o.tenant.clone(),
                active: o.active,
                rules: o.allow.clone(),
                source: registry::model::ClientAccessSource::Override,
            })
            .collect();
        client_access_store.update(&[], &overrides);

        let route_table = Arc::new(RouteTable::new());
        let registry = Arc::new(registry);
        let route_refresh = Arc::new(RouteRefreshService::new(
            Arc::clone(&registry),
            Arc::clone(&route_table),
            config.rate_limit.clone(),
            config.registry.retry.clone(),
        ));
        // One synchronous pass before serving, so the first request does
        // not race a backgrounded refresh for an empty route table.
        route_refresh.refresh_routes().await;

        let pubsub = Arc::new(pubsub);
        let publisher = EventPublisher::new(
            Arc::clone(&pubsub),
            config.events.channel.clone(),
            std::time::Duration::from_millis(config.events.debounce_delay_ms),
            Arc::clone(&metrics),
        );

        let subscriber_handle = if config.events.enabled {
            let subscriber = EventSubscriber::new(
                Arc::clone(&pubsub),
                config.events.channel.clone(),
                Arc::clone(&route_refresh),
                config.registry.retry.clone(),
                Arc::clone(&metrics),
            );
            Some(tokio::spawn(subscriber.run()))
        } else {
            None
        };

        let fallback = Arc::new(FallbackScheduler::new(
            Arc::clone(&pubsub),
            Arc::clone(&route_refresh),
            config.events.fallback_interval,
        ));
        let fallback_handle = tokio::spawn(Arc::clone(&fallback).run());

        let rate_limiter = RateLimiter::new(store);
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(JwtFilter {
                key_cache: key_cache.clone(),
                config: config.jwt.validator_config(),
            }),
            Arc::new(AccessControlFilter {
                store: client_access_store,
                claim_names: config.client_access_control.client_id_claims.clone(),
                enabled: config.client_access_control.enabled,
            }),
            Arc::new(BodyValidatorFilter),
            Arc::new(RateLimitFilter {
                limiter: rate_limiter,
                metrics: Arc::clone(&metrics),
            }),
        ];
        let chain = Arc::new(FilterChain::new(filters));

        let circuit_breakers = Arc::new(DashMap::new());
        let proxy = Arc::new(ProxyClient::new(proxy::ProxyConfig {
            connect_timeout: config.circuit_breaker.call_timeout,
            request_timeout: config.circuit_breaker.call_timeout,
            ..Default::default()
        }));

        let state = GatewayState {
            config: Arc::clone(&config),
            route_table,
            chain,
            metrics,
            proxy,
            circuit_breakers,
            circuit_breaker_config: config.circuit_breaker.clone(),
            route_refresh,
            fallback,
            publisher,
        };

        let app = Self::build_app(state.clone());

        Ok(Self {
            state,
            app,
            subscriber_handle,
            fallback_handle,
        })
    }

    fn build_app(state: GatewayState<R, P>) -> AxumRouter {
        let mut app = AxumRouter::new()
            .route("/fallback/*path", any(handle_fallback))
            .route("/fallback", any(handle_fallback));

        if state.config.metrics.enabled {
            app = app
                .route("/actuator/health", axum::routing::get(handle_health))
                .route(&state.config.metrics.endpoint, axum::routing::get(handle_metrics::<R, P>));
        }

        app.route("/*path", any(handle_request::<R, P>))
            .route("/", any(handle_request::<R, P>))
            .with_state(state)
    }

    /// Starts the HTTP listener and serves until a `SIGINT`/`SIGTERM` (or,
    /// on platforms without the latter, just `SIGINT`) requests a clean
    /// shutdown — exit code 0 per spec.md §6. Background tasks (route
    /// refresh subscriber, fallback scheduler) were already spawned by
    /// [`Gateway::build_with`] and are aborted once the listener stops.
    pub async fn start(self) -> Result<(), GatewayInitError> {
        let addr = self.state.config.server.bind;
        info!(%addr, "starting api gateway");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayInitError::Server(e.to_string()))?;

        let result = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayInitError::Server(e.to_string()));

        if let Some(handle) = self.subscriber_handle {
            handle.abort();
        }
        self.fallback_handle.abort();

        result
    }

    /// Gateway state, for embedding in a custom server loop or tests.
    pub fn state(&self) -> &GatewayState<R, P> {
        &self.state
    }

    /// Dispatches one request through the same filter chain and upstream
    /// proxy `/*path` routing hits, without binding a real listener.
    /// `peer` stands in for the connection's observed socket address,
    /// consulted by the `client-ip` rate-limit key resolver (C8).
    pub async fn dispatch(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        handle_request(State(self.state.clone()), peer.map(ConnectInfo), request).await
    }
}

/// `/fallback/**` (spec.md §6): always 503, regardless of route-table
/// state — the deliberate "system is down for maintenance" surface.
async fn handle_fallback() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "message": "Service is unavailable. Please try after sometime."
        })),
    )
}

async fn handle_health() -> impl IntoResponse {
    StatusCode::OK
}

async fn handle_metrics<R: RegistryClient, P: PubSub>(State(state): State<GatewayState<R, P>>) -> Response {
    match state.metrics.export_prometheus() {
        Some(text) => (StatusCode::OK, text).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Buffers the request body into `Bytes` while preserving method, URI,
/// and headers — C9 (schema validation) needs the whole body up front,
/// and the upstream dispatch needs it again to forward unchanged.
async fn buffer_request(request: Request) -> Result<(Request, Bytes), GatewayError> {
    let (parts, body) = request.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| GatewayError::bad_request(format!("failed to read request body: {e}")))?
        .to_bytes();
    let request = Request::from_parts(parts, Body::from(bytes.clone()));
    Ok((request, bytes))
}

fn client_ip_from(addr: Option<SocketAddr>) -> Option<IpAddr> {
    addr.map(|a| a.ip())
}

/// Resolves once `SIGINT` arrives (or `SIGTERM` too, on unix), so
/// `Gateway::start` can hand axum a clean shutdown future instead of
/// serving until the process is killed.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

fn apply_upstream_headers(mut request: Request, headers: &std::collections::HashMap<String, String>) -> Request {
    for (name, value) in headers {
        // Rate-limit accounting headers are client-response-facing, not
        // upstream-facing (spec.md §4.7) — the dispatcher applies them to
        // the response separately, never to the forwarded request.
        if name.starts_with("x-ratelimit-") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            request.headers_mut().insert(name, value);
        }
    }
    request
}

fn apply_response_headers(mut response: Response, headers: &std::collections::HashMap<String, String>) -> Response {
    for (name, value) in headers {
        if !name.starts_with("x-ratelimit-") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// The single request-boundary dispatcher (spec.md §2's data flow: C16
/// dispatcher → C10 pre → C4 → C6 → C9 → C7 → rewrite → upstream → C10
/// post). Every exit path — no matching route, a filter short-circuit,
/// or a successful upstream round trip — logs exactly once via the
/// per-request [`AccessLogFilter`] guard.
async fn handle_request<R: RegistryClient, P: PubSub>(
    State(state): State<GatewayState<R, P>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let access_log = AccessLogFilter::new(state.config.accesslog.clone());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let request_headers = access_log.capture_request_headers(request.headers());
    let socket_addr = client_ip_from(connect_info.map(|ci| ci.0));

    let (request, body) = match buffer_request(request).await {
        Ok(pair) => pair,
        Err(e) => return finish_error(&access_log, &method, &uri, "UNKNOWN", e, request_headers),
    };

    let snapshot = state.route_table.current();
    let route = match snapshot.find(&method, &path) {
        Some(route) => route,
        None => {
            let err = GatewayError::not_found("no route matches this request");
            return finish_error(&access_log, &method, &uri, "UNKNOWN", err, request_headers);
        }
    };

    let mut ctx = FilterContext {
        route,
        method: &method,
        path: &path,
        headers: request.headers(),
        socket_addr,
        body: &body,
        upstream_headers: std::collections::HashMap::new(),
        identity: None,
        client_id: None,
    };

    if let Err(err) = state.chain.run(&mut ctx).await {
        return finish_error(&access_log, &method, &uri, &route.id, err, request_headers);
    }

    let upstream_headers = ctx.upstream_headers.clone();
    let route_id = route.id.clone();
    let route_uri = route.uri.clone();
    let request_filters = route.request_filters.clone();
    let response_filters = route.response_filters.clone();

    let request = apply_upstream_headers(request, &upstream_headers);
    let request = rewrite::apply_request_rules(request, &request_filters);

    let breaker = state
        .circuit_breakers
        .entry(route_id.clone())
        .or_insert_with(|| CircuitBreaker::new(state.circuit_breaker_config.clone()))
        .clone();

    if state.circuit_breaker_config.enabled && breaker.allow_request().is_err() {
        let err = GatewayError::service_unavailable("upstream circuit breaker is open");
        return finish_error(&access_log, &method, &uri, &route_id, err, request_headers);
    }

    let start = Instant::now();
    let call_timeout = breaker.call_timeout();
    let response = tokio::time::timeout(call_timeout, state.proxy.forward(request, &route_uri)).await;

    let response = match response {
        Ok(Ok(response)) => {
            breaker.record_success();
            response
        }
        Ok(Err(e)) => {
            breaker.record_failure();
            error!(route_id = %route_id, error = %e, "upstream dispatch failed");
            Response::<Body>::from(e)
        }
        Err(_) => {
            breaker.record_failure();
            GatewayError::service_unavailable("upstream call timed out").into_response()
        }
    };

    state
        .metrics
        .record_request(&route_id, method.as_str(), response.status().as_u16(), start.elapsed().as_secs_f64());

    let response = rewrite::apply_response_rules(response, &response_filters);
    let mut response = apply_response_headers(response, &upstream_headers);

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let response_headers = access_log.capture_response_headers(response.headers());

    let response_body = if access_log.should_capture_body(&route_id, status, content_type.as_deref()) {
        let (parts, body) = response.into_parts();
        match body.collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                let captured = String::from_utf8_lossy(&bytes).to_string();
                response = Response::from_parts(parts, Body::from(bytes));
                Some(captured)
            }
            Err(_) => {
                response = Response::from_parts(parts, Body::empty());
                None
            }
        }
    } else {
        None
    };

    access_log.log_once(AccessLogEntry {
        method: method.to_string(),
        uri: uri.to_string(),
        route_id,
        status,
        latency_ms: access_log.elapsed_ms(),
        request_headers,
        response_headers,
        response_body,
    });

    response
}

fn finish_error(
    access_log: &AccessLogFilter,
    method: &Method,
    uri: &http::Uri,
    route_id: &str,
    err: GatewayError,
    request_headers: Option<Vec<(String, String)>>,
) -> Response {
    let status = err.status.as_u16();
    access_log.log_once(AccessLogEntry {
        method: method.to_string(),
        uri: uri.to_string(),
        route_id: route_id.to_string(),
        status,
        latency_ms: access_log.elapsed_ms(),
        request_headers,
        response_headers: None,
        response_body: None,
    });
    err.into_response()
}
