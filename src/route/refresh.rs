//! Route Refresh Service (C12): pulls the current route list from the
//! Registry, compiles it (delegating to [`super::compile`]), and
//! installs the result into the Route Table (C11). At most one refresh
//! runs at a time; concurrent callers coalesce into the in-flight
//! refresh's completion rather than triggering their own (spec.md §4.12).

use super::compile::compile_all;
use super::table::{RouteSnapshot, RouteTable};
use crate::config::RetryConfig;
use crate::registry::client::RegistryClient;
use crate::retry::execute_with_retry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info};

struct InFlight {
    sender: broadcast::Sender<()>,
}

pub struct RouteRefreshService<R: RegistryClient> {
    registry: Arc<R>,
    table: Arc<RouteTable>,
    rate_limit_settings: crate::config::RateLimitSettings,
    retry: RetryConfig,
    generation: AtomicU64,
    failure_count: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

impl<R: RegistryClient> RouteRefreshService<R> {
    pub fn new(
        registry: Arc<R>,
        table: Arc<RouteTable>,
        rate_limit_settings: crate::config::RateLimitSettings,
        retry: RetryConfig,
    ) -> Self {
        Self {
            registry,
            table,
            rate_limit_settings,
            retry,
            generation: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Idempotent: fetches, compiles, and installs a fresh snapshot. A
    /// Registry that cannot be reached (after the retry template is
    /// exhausted) leaves the current snapshot in place and increments the
    /// failure counter; it does not propagate as an error the caller must
    /// handle specially, matching the fallback scheduler's "never dies"
    /// contract (spec.md §4.14).
    pub async fn refresh_routes(&self) {
        let mut receiver = {
            let mut guard = self.in_flight.lock().await;
            match guard.as_ref() {
                Some(in_flight) => Some(in_flight.sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    *guard = Some(InFlight { sender });
                    None
                }
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            let _ = receiver.recv().await;
            return;
        }

        self.do_refresh().await;

        let mut guard = self.in_flight.lock().await;
        if let Some(in_flight) = guard.take() {
            let _ = in_flight.sender.send(());
        }
    }

    async fn do_refresh(&self) {
        let registry = Arc::clone(&self.registry);
        let result = execute_with_retry(&self.retry, || {
            let registry = Arc::clone(&registry);
            async move { registry.list_routes().await }
        })
        .await;

        match result {
            Ok(defs) => {
                let routes = compile_all(&defs, &self.rate_limit_settings);
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                info!(generation, routes = routes.len(), fetched = defs.len(), "route refresh succeeded");
                self.table.install(RouteSnapshot { generation, routes });
            }
            Err(e) => {
                self.failure_count.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "route refresh failed, keeping current snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::registry::client::InMemoryRegistryClient;
    use crate::registry::model::{PredicateSpec, RouteDefinition};
    use std::collections::HashMap;
    use std::time::Duration;

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn seeded_route(id: &str) -> RouteDefinition {
        let mut args = HashMap::new();
        args.insert("pattern".to_string(), "/svc/*".to_string());
        RouteDefinition {
            id: id.to_string(),
            uri: "http://upstream".to_string(),
            predicates: vec![PredicateSpec { name: "Path".to_string(), args }],
            filters: vec![],
            metadata: HashMap::new(),
            service: "svc".to_string(),
            context_path: None,
            api_docs: false,
            order: 0,
        }
    }

    #[tokio::test]
    async fn refresh_installs_compiled_snapshot() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        registry.seed_route(seeded_route("r1"));
        let table = Arc::new(RouteTable::new());
        let service = RouteRefreshService::new(registry, table.clone(), RateLimitSettings::default(), retry_config());

        service.refresh_routes().await;

        let snapshot = table.current();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.routes.len(), 1);
        assert_eq!(service.failure_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        registry.seed_route(seeded_route("r1"));
        let table = Arc::new(RouteTable::new());
        let service = Arc::new(RouteRefreshService::new(
            registry,
            table.clone(),
            RateLimitSettings::default(),
            retry_config(),
        ));

        let a = Arc::clone(&service);
        let b = Arc::clone(&service);
        let (ra, rb) = tokio::join!(a.refresh_routes(), b.refresh_routes());
        let _ = (ra, rb);

        assert!(table.current().generation >= 1);
    }
}
