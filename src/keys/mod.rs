//! Public-Key Cache (C3): keeps a per-source, periodically refreshed
//! set of decoding keys that the JWT Validator (C4) looks up by `kid`.

pub mod source;

use crate::metrics::MetricsCollector;
use crate::registry::model::{KeyAuthType, PublicKeyRecord, PublicKeySource};
use dashmap::{DashMap, DashSet};
use source::{fetch_keys, KeyFetchError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Multi-source cache of public keys, keyed by `kid`. A refresh replaces
/// its source's whole key set atomically (spec.md §4.3): a fetch failure
/// leaves the prior set for that source untouched, and a successful
/// fetch's key set wholly supersedes the source's previous one. A key
/// dropped by a rotation is evicted only once every source that has ever
/// contributed it has itself reported success since startup and none of
/// them still provide it — a flaky source can never evict a key some
/// other, still-unrefreshed source is the sole remaining owner of.
#[derive(Clone)]
pub struct KeyCache {
    keys: Arc<DashMap<String, PublicKeyRecord>>,
    /// Per-source key-id set from that source's most recent *successful*
    /// fetch. Absent until a source's first success.
    source_last_known: Arc<DashMap<String, HashSet<String>>>,
    /// Every source that has ever contributed a given `keyId` in a
    /// successful fetch, used to gate rotation eviction.
    key_owners: Arc<DashMap<String, HashSet<String>>>,
    /// Sources with at least one successful fetch since startup.
    succeeded_sources: Arc<DashSet<String>>,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
            source_last_known: Arc::new(DashMap::new()),
            key_owners: Arc::new(DashMap::new()),
            succeeded_sources: Arc::new(DashSet::new()),
        }
    }
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key_id: &str) -> Option<PublicKeyRecord> {
        self.keys.get(key_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Fetches a single source's keys and, on success, replaces that
    /// source's whole key set in one update, then runs rotation eviction
    /// for any key the source used to contribute but no longer does. A
    /// fetch failure changes nothing (spec.md §4.3: "a failure leaves the
    /// prior set in place"). Records the per-source refresh outcome,
    /// duration, and the resulting cache size.
    pub async fn refresh_source(
        &self,
        source: &PublicKeySource,
        client: &reqwest::Client,
        metrics: &Arc<dyn MetricsCollector>,
    ) {
        let started = Instant::now();
        match fetch_keys(source, client).await {
            Ok(records) => {
                debug!(source_id = %source.id, count = records.len(), "refreshed public keys");
                let new_ids: HashSet<String> = records.iter().map(|r| r.key_id.clone()).collect();

                for record in records {
                    self.key_owners
                        .entry(record.key_id.clone())
                        .or_default()
                        .insert(source.id.clone());
                    self.keys.insert(record.key_id.clone(), record);
                }

                let old_ids = self
                    .source_last_known
                    .insert(source.id.clone(), new_ids.clone())
                    .unwrap_or_default();
                self.succeeded_sources.insert(source.id.clone());

                for key_id in old_ids.difference(&new_ids) {
                    self.evict_if_unclaimed(key_id);
                }

                metrics.record_key_cache_refresh(&source.id, true, started.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "public key refresh failed, keeping cached keys");
                metrics.record_key_cache_refresh(&source.id, false, started.elapsed().as_secs_f64());
            }
        }
        metrics.record_key_cache_size(self.len());
    }

    /// Evicts `key_id` only when every source that has ever contributed
    /// it has itself reported at least one success since startup, and
    /// none of them currently still provide it (spec.md §4.3). A source
    /// that has never yet succeeded blocks eviction — it may turn out to
    /// still own this key once it does.
    fn evict_if_unclaimed(&self, key_id: &str) {
        let owners = match self.key_owners.get(key_id) {
            Some(owners) => owners.clone(),
            None => return,
        };
        let all_owners_have_succeeded = owners.iter().all(|o| self.succeeded_sources.contains(o));
        if !all_owners_have_succeeded {
            return;
        }
        let still_provided = owners.iter().any(|o| {
            self.source_last_known
                .get(o)
                .map(|s| s.contains(key_id))
                .unwrap_or(false)
        });
        if !still_provided {
            self.keys.remove(key_id);
            self.key_owners.remove(key_id);
        }
    }

    /// Spawns one background refresh loop per configured source, each on
    /// its own `refresh_interval`. Returns the join handles so the caller
    /// can abort them on shutdown.
    pub fn spawn_refresh_tasks(
        self,
        sources: Vec<PublicKeySource>,
        client: reqwest::Client,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Vec<JoinHandle<()>> {
        metrics.record_key_cache_source_count(sources.len());
        sources
            .into_iter()
            .map(|source| {
                let cache = self.clone();
                let client = client.clone();
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    loop {
                        cache.refresh_source(&source, &client, &metrics).await;
                        tokio::time::sleep(source.refresh_interval).await;
                    }
                })
            })
            .collect()
    }
}

/// Auth required for fetching keys from a remote source, before the
/// keys themselves are fetched (the validator's own requests never use
/// these credentials, only the fetcher does).
pub(crate) fn requires_auth(source: &PublicKeySource) -> bool {
    !matches!(source.auth_type, KeyAuthType::None)
}

pub(crate) fn request_timeout() -> Duration {
    Duration::from_secs(30)
}

pub use source::KeyFetchError as PublicKeyFetchError;
