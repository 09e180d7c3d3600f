//! Wire types shared with the (out-of-scope) API Registry.
//!
//! These are the data-model structs spec.md §3 names. They are used both
//! as the [`crate::registry::client::RegistryClient`] wire format and,
//! where a type also appears in local configuration (`RateLimitConfig`,
//! `AccessRule`), as the single canonical struct — see the Open Question
//! resolution in DESIGN.md for why there is only one `RouteChangeEvent`
//! shape rather than the two the source exhibited.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A compiled-from-Registry route definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub predicates: Vec<PredicateSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub service: String,
    #[serde(default)]
    pub context_path: Option<String>,
    #[serde(default)]
    pub api_docs: bool,
    #[serde(default)]
    pub order: i32,
}

/// `{name, argMap}` predicate as stored by the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateSpec {
    pub name: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// `{name, argMap}` filter as stored by the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// Recognized `RouteDefinition.metadata` keys; all other keys are opaque.
pub mod metadata_keys {
    pub const SCHEMA: &str = "Schema";
    pub const SCHEMA_VALIDATOR: &str = "SchemaValidator";
    pub const HEADERS: &str = "headers";
    pub const CACHE_KEY: &str = "cacheKey";
    pub const CACHE_SIZE: &str = "cacheSize";
    pub const CACHE_TTL: &str = "cacheTtl";
    /// Header name argument for a route whose `keyResolverName` is
    /// `"header"` (C8); required for that resolver to compile.
    pub const RATE_LIMIT_HEADER_NAME: &str = "rateLimitHeaderName";
}

/// Token-bucket rate-limit configuration for one route or namespace.
///
/// The single canonical shape — see DESIGN.md's Open Question resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub replenish_rate: u32,
    pub burst_capacity: u32,
    pub requested_tokens: u32,
    pub key_resolver_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl RateLimitConfig {
    /// Validate against the bounds configured for the gateway as a whole.
    /// This is the variant spec.md §9 calls authoritative: it checks
    /// `maxBurstCapacity`/`maxReplenishRate` and resolver-name presence.
    pub fn validate(
        &self,
        max_replenish_rate: u32,
        max_burst_capacity: u32,
        known_resolvers: &[String],
    ) -> Result<(), String> {
        if self.replenish_rate == 0 || self.replenish_rate > max_replenish_rate {
            return Err(format!(
                "replenishRate must be in (0, {}], got {}",
                max_replenish_rate, self.replenish_rate
            ));
        }
        if self.burst_capacity == 0 || self.burst_capacity > max_burst_capacity {
            return Err(format!(
                "burstCapacity must be in (0, {}], got {}",
                max_burst_capacity, self.burst_capacity
            ));
        }
        if self.requested_tokens > self.burst_capacity {
            return Err("requestedTokens must be <= burstCapacity".to_string());
        }
        if self.burst_capacity < self.replenish_rate {
            return Err("burstCapacity must be >= replenishRate".to_string());
        }
        if !known_resolvers.iter().any(|r| r == &self.key_resolver_name) {
            return Err(format!(
                "unknown keyResolverName '{}'",
                self.key_resolver_name
            ));
        }
        Ok(())
    }
}

/// A public key material source, as configured or as listed by the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeySource {
    pub id: String,
    #[serde(flatten)]
    pub location: KeyLocation,
    #[serde(rename = "type")]
    pub source_type: KeySourceType,
    pub auth_type: KeyAuthType,
    #[serde(default)]
    pub credentials: Option<KeyCredentials>,
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub refresh_interval: std::time::Duration,
}

fn default_refresh_interval() -> std::time::Duration {
    std::time::Duration::from_secs(600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyLocation {
    Url { url: String },
    Inline { inline: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum KeySourceType {
    Jwks,
    PemCert,
    PemPubkey,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyAuthType {
    None,
    Basic,
    ClientCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

/// A cached, resolved public key.
#[derive(Debug, Clone)]
pub struct PublicKeyRecord {
    pub key_id: String,
    pub algorithm: jsonwebtoken::Algorithm,
    pub public_key: jsonwebtoken::DecodingKey,
    pub source_id: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

/// One access-control record for a client, either persisted by the
/// Registry or injected via static configuration overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAccessConfig {
    pub client_id: String,
    pub tenant: String,
    pub active: bool,
    pub rules: Vec<String>,
    pub source: ClientAccessSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientAccessSource {
    Persisted,
    Override,
}

/// A single parsed rule: `"svc:rt"` (allow) or `"!svc:rt"` (deny).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub service: String,
    pub route: String,
    pub deny: bool,
}

/// A configuration-propagation event, published by the Registry and
/// consumed by the Event Subscriber. Richer shape is canonical per
/// DESIGN.md; `routes`/`operation` default so older-shaped senders are
/// still accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteChangeEvent {
    pub event_id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: RouteChangeEventType,
    pub services: Vec<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub operation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteChangeEventType {
    RouteChange,
    RateLimitConfigChange,
    ServiceHealthChange,
    ClientAccessControlUpdated,
}

/// Shared-store bucket state for the token bucket algorithm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: i64,
    pub last_refill_millis: i64,
}
