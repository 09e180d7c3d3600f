//! Fallback Scheduler (C14): on a fixed timer, probes the shared pub/sub
//! substrate's liveness; while the substrate is unreachable it drives the
//! Route Refresh Service (C12) directly so the Route Table (C11) does not
//! go stale just because the Event Subscriber's (C13) channel is down
//! (spec.md §4.14).

use crate::pubsub::PubSub;
use crate::registry::client::RegistryClient;
use crate::route::refresh::RouteRefreshService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct FallbackScheduler<R: RegistryClient, P: PubSub> {
    pubsub: Arc<P>,
    refresh: Arc<RouteRefreshService<R>>,
    interval: Duration,
    fallback_active: AtomicBool,
}

impl<R, P> FallbackScheduler<R, P>
where
    R: RegistryClient + 'static,
    P: PubSub + 'static,
{
    pub fn new(pubsub: Arc<P>, refresh: Arc<RouteRefreshService<R>>, interval: Duration) -> Self {
        Self {
            pubsub,
            refresh,
            interval,
            fallback_active: AtomicBool::new(false),
        }
    }

    pub fn is_fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::SeqCst)
    }

    /// Forces fallback mode on, as an operator signal would (spec.md
    /// §4.14's "an external signal may set fallbackActive directly").
    pub fn activate(&self) {
        self.fallback_active.store(true, Ordering::SeqCst);
    }

    /// Runs the fixed-timer probe loop forever. Spawned as a background
    /// task by the composition root; never returns and never panics on a
    /// refresh failure (spec.md §4.14's "the scheduler never dies").
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        match self.pubsub.ping().await {
            Ok(()) => {
                if self.fallback_active.swap(false, Ordering::SeqCst) {
                    info!("pub/sub substrate recovered, leaving fallback mode");
                }
            }
            Err(e) => {
                if !self.fallback_active.swap(true, Ordering::SeqCst) {
                    warn!(error = %e, "pub/sub substrate unreachable, entering fallback mode");
                } else {
                    warn!(error = %e, "pub/sub substrate still unreachable");
                }
                self.refresh.refresh_routes().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitSettings, RetryConfig};
    use crate::pubsub::InMemoryPubSub;
    use crate::registry::client::InMemoryRegistryClient;
    use crate::route::table::RouteTable;
    use std::time::Duration;

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn successful_probe_clears_fallback_without_refresh() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        let table = Arc::new(RouteTable::new());
        let refresh = Arc::new(RouteRefreshService::new(
            registry,
            table.clone(),
            RateLimitSettings::default(),
            retry_config(),
        ));
        let pubsub = Arc::new(InMemoryPubSub::new());
        let scheduler = FallbackScheduler::new(pubsub, refresh, Duration::from_secs(30));
        scheduler.activate();
        assert!(scheduler.is_fallback_active());

        scheduler.tick().await;

        assert!(!scheduler.is_fallback_active());
        assert_eq!(table.current().generation, 0);
    }
}
