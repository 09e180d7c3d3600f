//! Gateway Configuration Module
//!
//! Recognized options per spec.md §6, loaded from a JSON/YAML-shaped
//! config tree and validated once at startup (spec.md §7: an invalid
//! rate-limit config or an unknown key resolver name must abort process
//! start, not fail lazily on first request). Mirrors the teacher's
//! struct-per-concern layout and `Default`/`humantime_serde` conventions.

use crate::error::ConfigError;
use crate::jwt::{HeaderClaimRule, JwtValidatorConfig};
use crate::registry::model::PublicKeySource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration tree for one Gateway process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub redis: RedisConfig,
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitSettings,
    #[serde(rename = "client-access-control")]
    pub client_access_control: ClientAccessControlConfig,
    pub accesslog: AccessLogConfig,
    pub jwt: JwtSourceConfig,
    pub metrics: MetricsConfig,
    #[serde(rename = "api-registry-events")]
    pub events: EventsConfig,
    pub circuit_breaker: crate::circuit::CircuitBreakerConfig,
}

/// `api.gateway.server`-equivalent bind/timeout settings (ambient; not a
/// named recognized option in spec.md §6, but every gateway process needs
/// one, per the teacher's own `ServerConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".parse().unwrap(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection info for the out-of-scope Registry REST API (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8761".to_string(),
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Connection info for the shared atomic store / pub-sub substrate.
/// Both C7's token bucket and C13/C14/C15's channel are backed by the
/// same Redis deployment in this implementation (spec.md §6 treats them
/// as two interfaces of one "shared substrate").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Bounded-backoff retry template shared by the Route Refresh Service
/// (C12) and the Event Subscriber (C13), per spec.md §5's "Retries".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// `api.gateway.rate-limit.*` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub defaults: RateLimitDefaults,
    #[serde(default)]
    pub overrides: Vec<RouteRateLimitOverride>,
    pub max_burst_capacity: u32,
    pub max_replenish_rate: u32,
    pub max_requested_tokens: u32,
    pub key_resolvers: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub retry: RetryConfig,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            defaults: RateLimitDefaults::default(),
            overrides: Vec::new(),
            max_burst_capacity: 10_000,
            max_replenish_rate: 10_000,
            max_requested_tokens: 10_000,
            key_resolvers: vec![
                "client-ip".to_string(),
                "header".to_string(),
                "route-name".to_string(),
                "route-path".to_string(),
            ],
            namespace: default_namespace(),
            retry: RetryConfig::default(),
        }
    }
}

/// Limiter-wide default token-bucket parameters, applied to any route
/// whose metadata carries no per-route override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    pub replenish_rate: u32,
    pub burst_capacity: u32,
    pub requested_tokens: u32,
    pub key_resolver_name: String,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            replenish_rate: 10,
            burst_capacity: 20,
            requested_tokens: 1,
            key_resolver_name: "client-ip".to_string(),
        }
    }
}

/// One `rate-limit.overrides[]` entry: a per-route token-bucket override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRateLimitOverride {
    pub route_id: String,
    pub replenish_rate: u32,
    pub burst_capacity: u32,
    pub requested_tokens: u32,
    pub key_resolver_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl RateLimitSettings {
    /// Startup validation: every override and the limiter defaults must
    /// satisfy spec.md §3's `RateLimitConfig` invariants, and every
    /// `keyResolverName` referenced anywhere must be a configured
    /// resolver. Fatal on failure per spec.md §7.
    pub fn validate(&self) -> Result<()> {
        self.as_config(&self.defaults, &default_namespace())
            .validate(self.max_replenish_rate, self.max_burst_capacity, &self.key_resolvers)
            .map_err(ConfigError::Invalid)?;

        for over in &self.overrides {
            let cfg = crate::registry::model::RateLimitConfig {
                replenish_rate: over.replenish_rate,
                burst_capacity: over.burst_capacity,
                requested_tokens: over.requested_tokens,
                key_resolver_name: over.key_resolver_name.clone(),
                namespace: over.namespace.clone(),
            };
            cfg.validate(self.max_replenish_rate, self.max_burst_capacity, &self.key_resolvers)
                .map_err(|e| ConfigError::Invalid(format!("rate-limit override {}: {}", over.route_id, e)))?;
        }
        Ok(())
    }

    fn as_config(
        &self,
        defaults: &RateLimitDefaults,
        namespace: &str,
    ) -> crate::registry::model::RateLimitConfig {
        crate::registry::model::RateLimitConfig {
            replenish_rate: defaults.replenish_rate,
            burst_capacity: defaults.burst_capacity,
            requested_tokens: defaults.requested_tokens,
            key_resolver_name: defaults.key_resolver_name.clone(),
            namespace: namespace.to_string(),
        }
    }

    /// Resolves the effective rate-limit config for a route: its override
    /// if one is configured, else the limiter-wide defaults (spec.md §4.7:
    /// "Per-route config override takes precedence ... missing per-route
    /// config uses the limiter default").
    pub fn config_for_route(&self, route_id: &str) -> crate::registry::model::RateLimitConfig {
        if let Some(over) = self.overrides.iter().find(|o| o.route_id == route_id) {
            crate::registry::model::RateLimitConfig {
                replenish_rate: over.replenish_rate,
                burst_capacity: over.burst_capacity,
                requested_tokens: over.requested_tokens,
                key_resolver_name: over.key_resolver_name.clone(),
                namespace: over.namespace.clone(),
            }
        } else {
            self.as_config(&self.defaults, &self.namespace)
        }
    }
}

/// `api.gateway.client-access-control.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAccessControlConfig {
    pub enabled: bool,
    #[serde(default)]
    pub overrides: Vec<ClientAccessOverride>,
    /// Ordered claim names C6 scans (case-insensitively) to resolve the
    /// caller's `clientId` from validated JWT claims; the first present,
    /// non-blank claim wins (spec.md §4.6).
    #[serde(default = "default_client_id_claims", rename = "client-id-claims")]
    pub client_id_claims: Vec<String>,
}

fn default_client_id_claims() -> Vec<String> {
    vec!["client_id".to_string()]
}

impl Default for ClientAccessControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overrides: Vec::new(),
            client_id_claims: default_client_id_claims(),
        }
    }
}

/// One static override entry, merged over persisted Registry configs by
/// C5 (`access::merger`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAccessOverride {
    pub client_id: String,
    pub tenant: String,
    #[serde(default)]
    pub description: String,
    pub active: bool,
    pub allow: Vec<String>,
}

/// `api.gateway.accesslog.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    pub enabled: bool,
    #[serde(rename = "request-headers")]
    pub request_headers: HeaderCaptureConfig,
    #[serde(rename = "response-headers")]
    pub response_headers: HeaderCaptureConfig,
    #[serde(rename = "response-body")]
    pub response_body: ResponseBodyCaptureConfig,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_headers: HeaderCaptureConfig::default(),
            response_headers: HeaderCaptureConfig::default(),
            response_body: ResponseBodyCaptureConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderCaptureConfig {
    pub enabled: bool,
    #[serde(default, rename = "skip-headers")]
    pub skip_headers: Vec<String>,
}

impl Default for HeaderCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            skip_headers: vec!["authorization".to_string(), "cookie".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBodyCaptureConfig {
    pub enabled: bool,
    #[serde(default, rename = "skip-for-routes")]
    pub skip_for_routes: Vec<String>,
}

impl Default for ResponseBodyCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            skip_for_routes: Vec::new(),
        }
    }
}

/// `api.gateway.jwt.*`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JwtSourceConfig {
    #[serde(rename = "key-sources")]
    pub key_sources: Vec<PublicKeySource>,
    #[serde(default = "default_user_id_field")]
    pub user_id_field: String,
    #[serde(default)]
    pub token_header_validation_config: HashMap<String, HeaderClaimRule>,
}

fn default_user_id_field() -> String {
    "sub".to_string()
}

impl JwtSourceConfig {
    pub fn validator_config(&self) -> JwtValidatorConfig {
        JwtValidatorConfig {
            user_id_field: self.user_id_field.clone(),
            token_header_validation: self.token_header_validation_config.clone(),
        }
    }
}

/// `api.gateway.metrics.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets: Vec<f64>,
}

fn default_metrics_endpoint() -> String {
    "/actuator/prometheus".to_string()
}

fn default_latency_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_metrics_endpoint(),
            latency_buckets: default_latency_buckets(),
        }
    }
}

/// `api-registry.events.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub enabled: bool,
    pub channel: String,
    #[serde(rename = "debounce-delay-ms")]
    pub debounce_delay_ms: u64,
    /// Interval between Fallback Scheduler (C14) liveness probes.
    #[serde(with = "humantime_serde", default = "default_fallback_interval")]
    pub fallback_interval: Duration,
}

fn default_fallback_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "api-gateway.route-events".to_string(),
            debounce_delay_ms: 2_000,
            fallback_interval: default_fallback_interval(),
        }
    }
}

impl GatewayConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Startup validation per spec.md §7: invalid rate-limit bounds or an
    /// unknown key-resolver name is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.enabled {
            self.rate_limit.validate()?;
        }
        if self.jwt.key_sources.is_empty() {
            return Err(ConfigError::MissingField("jwt.key-sources".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_rate_limit_bounds() {
        let config = GatewayConfig::default();
        assert!(config.rate_limit.validate().is_ok());
    }

    #[test]
    fn override_exceeding_burst_capacity_bound_is_rejected() {
        let mut settings = RateLimitSettings::default();
        settings.overrides.push(RouteRateLimitOverride {
            route_id: "r1".to_string(),
            replenish_rate: 5,
            burst_capacity: settings.max_burst_capacity + 1,
            requested_tokens: 1,
            key_resolver_name: "client-ip".to_string(),
            namespace: "default".to_string(),
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn unknown_key_resolver_name_is_rejected() {
        let mut settings = RateLimitSettings::default();
        settings.defaults.key_resolver_name = "does-not-exist".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn route_override_takes_precedence_over_defaults() {
        let mut settings = RateLimitSettings::default();
        settings.overrides.push(RouteRateLimitOverride {
            route_id: "r1".to_string(),
            replenish_rate: 99,
            burst_capacity: 99,
            requested_tokens: 1,
            key_resolver_name: "header".to_string(),
            namespace: "r1-namespace".to_string(),
        });
        let cfg = settings.config_for_route("r1");
        assert_eq!(cfg.replenish_rate, 99);
        assert_eq!(cfg.namespace, "r1-namespace");
        let default_cfg = settings.config_for_route("other");
        assert_eq!(default_cfg.replenish_rate, settings.defaults.replenish_rate);
    }
}
