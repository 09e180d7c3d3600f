//! Rule Store Merger (C5): combines the Registry's persisted
//! `ClientAccessConfig` rows with the static `overrides[]` from
//! configuration, override winning on `clientId` collision, and parses
//! each row's rule strings via C1 once at merge time so C6 never has to
//! re-parse per request.

use crate::registry::model::{AccessRule, ClientAccessConfig, ClientAccessSource};
use crate::rules;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One merged, rule-parsed client-access record — the form C6 evaluates
/// requests against.
#[derive(Debug, Clone)]
pub struct MergedClientAccess {
    pub client_id: String,
    pub tenant: String,
    pub active: bool,
    pub source: ClientAccessSource,
    pub rules: Vec<AccessRule>,
}

/// Merges persisted (`P`) and override (`O`) client-access configs:
/// every entry in `O` replaces any `P` entry with the same `clientId`;
/// unmatched `P` entries pass through unchanged. Deterministic —
/// `merge_rules(p, o) == merge_rules(p, o)` for any inputs (spec.md §8).
pub fn merge_rules(
    persisted: &[ClientAccessConfig],
    overrides: &[ClientAccessConfig],
) -> Vec<MergedClientAccess> {
    let mut by_client: HashMap<&str, &ClientAccessConfig> = HashMap::new();
    for p in persisted {
        by_client.insert(p.client_id.as_str(), p);
    }
    for o in overrides {
        by_client.insert(o.client_id.as_str(), o);
    }

    let mut merged: Vec<MergedClientAccess> = by_client
        .into_values()
        .map(|config| MergedClientAccess {
            client_id: config.client_id.clone(),
            tenant: config.tenant.clone(),
            active: config.active,
            source: config.source,
            rules: parse_rules(&config.client_id, &config.rules),
        })
        .collect();

    merged.sort_by(|a, b| a.client_id.cmp(&b.client_id));
    merged
}

fn parse_rules(client_id: &str, raw: &[String]) -> Vec<AccessRule> {
    raw.iter()
        .filter_map(|r| match rules::parse_rule(r) {
            Some(rule) => Some(rule),
            None => {
                warn!(client_id, rule = %r, "skipping invalid access rule");
                None
            }
        })
        .collect()
}

/// Reader-friendly, atomically-swapped view over the merged client-access
/// set. Single writer (the merger, on any Registry or override change);
/// any number of lock-free readers (C6, per request).
#[derive(Clone)]
pub struct ClientAccessStore {
    inner: Arc<ArcSwap<HashMap<String, MergedClientAccess>>>,
}

impl Default for ClientAccessStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }
}

impl ClientAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the merge and swaps it in as the new current view.
    pub fn update(&self, persisted: &[ClientAccessConfig], overrides: &[ClientAccessConfig]) {
        let merged = merge_rules(persisted, overrides);
        let map: HashMap<String, MergedClientAccess> =
            merged.into_iter().map(|m| (m.client_id.clone(), m)).collect();
        self.inner.store(Arc::new(map));
    }

    /// Looks up one client's merged record. A request proceeds past this
    /// only when the lookup returns `Some(_)` with `active == true`
    /// (spec.md §4.6).
    pub fn get(&self, client_id: &str) -> Option<MergedClientAccess> {
        self.inner.load().get(client_id).cloned()
    }
}
