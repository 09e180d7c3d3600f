//! Event Subscriber (C13): consumes `RouteChangeEvent`s from the shared
//! pub/sub substrate and drives the Route Refresh Service (C12)
//! accordingly. Malformed or empty payloads are dropped without
//! retrying; a well-formed event's refresh is retried per the configured
//! template before the failure is counted (spec.md §4.13).

use crate::config::RetryConfig;
use crate::metrics::MetricsCollector;
use crate::pubsub::PubSub;
use crate::registry::client::RegistryClient;
use crate::registry::model::{RouteChangeEvent, RouteChangeEventType};
use crate::retry::execute_with_retry;
use crate::route::refresh::RouteRefreshService;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

pub struct EventSubscriber<R: RegistryClient, P: PubSub> {
    pubsub: Arc<P>,
    channel: String,
    refresh: Arc<RouteRefreshService<R>>,
    retry: RetryConfig,
    metrics: Arc<dyn MetricsCollector>,
}

impl<R, P> EventSubscriber<R, P>
where
    R: RegistryClient + 'static,
    P: PubSub + 'static,
{
    pub fn new(
        pubsub: Arc<P>,
        channel: impl Into<String>,
        refresh: Arc<RouteRefreshService<R>>,
        retry: RetryConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            pubsub,
            channel: channel.into(),
            refresh,
            retry,
            metrics,
        }
    }

    /// Runs until the underlying subscription ends. Spawned as a
    /// background task by the composition root; a closed stream here
    /// means the transport itself dropped the subscription — the
    /// Fallback Scheduler (C14) is what notices and compensates, this
    /// loop does not attempt to resubscribe.
    pub async fn run(self) {
        let mut stream = match self.pubsub.subscribe(&self.channel).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, channel = %self.channel, "event subscriber failed to subscribe");
                return;
            }
        };

        while let Some(message) = stream.next().await {
            match message {
                Ok(payload) => self.handle_message(&payload).await,
                Err(e) => warn!(error = %e, "event subscriber transport error"),
            }
        }
        warn!(channel = %self.channel, "event subscriber stream ended");
    }

    async fn handle_message(&self, payload: &str) {
        if payload.trim().is_empty() {
            return;
        }
        let event: RouteChangeEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed route change event");
                self.metrics.record_event_received("MALFORMED", false);
                return;
            }
        };

        let event_type = event_type_label(event.event_type);
        let refresh = Arc::clone(&self.refresh);
        let result = execute_with_retry(&self.retry, move || {
            let refresh = Arc::clone(&refresh);
            async move {
                let failures_before = refresh.failure_count();
                refresh.refresh_routes().await;
                if refresh.failure_count() == failures_before {
                    Ok(())
                } else {
                    Err(())
                }
            }
        })
        .await;

        let succeeded = result.is_ok();
        debug!(event_type, succeeded, "processed route change event");
        self.metrics.record_event_received(event_type, succeeded);
    }
}

fn event_type_label(event_type: RouteChangeEventType) -> &'static str {
    match event_type {
        RouteChangeEventType::RouteChange => "ROUTE_CHANGE",
        RouteChangeEventType::RateLimitConfigChange => "RATE_LIMIT_CONFIG_CHANGE",
        RouteChangeEventType::ServiceHealthChange => "SERVICE_HEALTH_CHANGE",
        RouteChangeEventType::ClientAccessControlUpdated => "CLIENT_ACCESS_CONTROL_UPDATED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use crate::metrics::NoOpCollector;
    use crate::pubsub::InMemoryPubSub;
    use crate::registry::client::InMemoryRegistryClient;
    use crate::registry::model::PredicateSpec;
    use crate::route::table::RouteTable;
    use std::collections::HashMap;
    use std::time::Duration;

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn seeded_route(id: &str) -> crate::registry::model::RouteDefinition {
        let mut args = HashMap::new();
        args.insert("pattern".to_string(), "/svc/*".to_string());
        crate::registry::model::RouteDefinition {
            id: id.to_string(),
            uri: "http://upstream".to_string(),
            predicates: vec![PredicateSpec {
                name: "Path".to_string(),
                args,
            }],
            filters: vec![],
            metadata: HashMap::new(),
            service: "svc".to_string(),
            context_path: None,
            api_docs: false,
            order: 0,
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_not_retried() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        let table = Arc::new(RouteTable::new());
        let refresh = Arc::new(RouteRefreshService::new(
            registry,
            table.clone(),
            RateLimitSettings::default(),
            retry_config(),
        ));
        let pubsub = Arc::new(InMemoryPubSub::new());
        let subscriber = EventSubscriber::new(
            pubsub,
            "routes",
            refresh,
            retry_config(),
            Arc::new(NoOpCollector),
        );

        subscriber.handle_message("not json").await;
        assert_eq!(table.current().generation, 0);
    }

    #[tokio::test]
    async fn well_formed_event_triggers_refresh() {
        let registry = Arc::new(InMemoryRegistryClient::new());
        registry.seed_route(seeded_route("r1"));
        let table = Arc::new(RouteTable::new());
        let refresh = Arc::new(RouteRefreshService::new(
            registry,
            table.clone(),
            RateLimitSettings::default(),
            retry_config(),
        ));
        let pubsub = Arc::new(InMemoryPubSub::new());
        let subscriber = EventSubscriber::new(
            pubsub,
            "routes",
            refresh,
            retry_config(),
            Arc::new(NoOpCollector),
        );

        let event = RouteChangeEvent {
            event_id: uuid::Uuid::nil(),
            timestamp: chrono::Utc::now(),
            event_type: RouteChangeEventType::RouteChange,
            services: vec!["svc".to_string()],
            routes: vec![],
            operation: None,
        };
        subscriber
            .handle_message(&serde_json::to_string(&event).unwrap())
            .await;

        assert_eq!(table.current().generation, 1);
    }
}
