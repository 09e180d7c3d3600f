//! Registry Event Publisher (C15): debounces Registry route mutations
//! into a single consolidated `ROUTE_CHANGE` event per `debounceDelayMs`
//! window, with a second, undebounced path for other event types
//! (spec.md §4.15). In this gateway-side build the producer calling
//! `schedule_event`/`send_event` is the composition root reacting to a
//! local route/client-access mutation API, not the (out-of-scope)
//! Registry's own write path.

use crate::metrics::MetricsCollector;
use crate::pubsub::{PubSub, PubSubError};
use crate::registry::model::{RouteChangeEvent, RouteChangeEventType};
use dashmap::DashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct EventPublisher<P: PubSub> {
    pubsub: Arc<P>,
    channel: String,
    debounce_delay: Duration,
    pending: DashSet<String>,
    generation: AtomicU64,
    metrics: Arc<dyn MetricsCollector>,
}

impl<P> EventPublisher<P>
where
    P: PubSub + 'static,
{
    pub fn new(
        pubsub: Arc<P>,
        channel: impl Into<String>,
        debounce_delay: Duration,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pubsub,
            channel: channel.into(),
            debounce_delay,
            pending: DashSet::new(),
            generation: AtomicU64::new(0),
            metrics,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Adds `service` to the pending set and (re)arms a single-shot timer
    /// `debounceDelayMs` out. Idempotent — scheduling the same service
    /// repeatedly before it flushes collapses to one entry, and only the
    /// most recently armed timer actually flushes.
    pub fn schedule_event(self: &Arc<Self>, service: impl Into<String>) {
        self.pending.insert(service.into());
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce_delay).await;
            if this.generation.load(Ordering::SeqCst) == my_generation {
                this.flush().await;
            }
        });
    }

    /// Atomically drains the pending set and publishes one consolidated
    /// `ROUTE_CHANGE` event. On serialize/publish failure the set is left
    /// untouched and a retry is armed after one more debounce window, so
    /// a transport blip does not silently lose the pending services
    /// (spec.md §4.15's "so the next tick retries").
    async fn flush(self: Arc<Self>) {
        if self.pending.is_empty() {
            return;
        }
        let services: Vec<String> = self.pending.iter().map(|s| s.key().clone()).collect();
        let event = RouteChangeEvent {
            event_id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type: RouteChangeEventType::RouteChange,
            services: services.clone(),
            routes: Vec::new(),
            operation: None,
        };

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize route change event, retaining pending set");
                self.retry_flush();
                return;
            }
        };

        match self.pubsub.publish(&self.channel, &payload).await {
            Ok(()) => {
                for service in &services {
                    self.pending.remove(service);
                }
                self.metrics.record_event_published("ROUTE_CHANGE");
                debug!(services = services.len(), "flushed debounced route change event");
            }
            Err(e) => {
                warn!(error = %e, "failed to publish route change event, retaining pending set");
                self.retry_flush();
            }
        }
    }

    fn retry_flush(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let delay = self.debounce_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.flush().await;
        });
    }

    /// Publishes one event immediately, bypassing debouncing — the path
    /// for non-route-change event types (spec.md §4.15).
    pub async fn send_event(
        &self,
        event_type: RouteChangeEventType,
        services: Vec<String>,
        routes: Vec<String>,
    ) -> Result<(), PubSubError> {
        let event = RouteChangeEvent {
            event_id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            services,
            routes,
            operation: None,
        };
        let payload = serde_json::to_string(&event)
            .map_err(|e| PubSubError::Transport(e.to_string()))?;
        self.pubsub.publish(&self.channel, &payload).await?;
        self.metrics.record_event_published(event_type_label(event_type));
        Ok(())
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
    use crate::metrics::NoOpCollector;
    use crate::pubsub::InMemoryPubSub;

    #[tokio::test]
    async fn scheduling_same_service_twice_collapses_to_one_pending_entry() {
        let pubsub = Arc::new(InMemoryPubSub::new());
        let publisher = EventPublisher::new(
            pubsub,
            "routes",
            Duration::from_millis(20),
            Arc::new(NoOpCollector),
        );

        publisher.schedule_event("svc-a");
        publisher.schedule_event("svc-a");
        assert_eq!(publisher.pending_count(), 1);
    }

    #[tokio::test]
    async fn debounced_flush_publishes_and_drains_pending() {
        let pubsub = Arc::new(InMemoryPubSub::new());
        let mut stream = pubsub.subscribe("routes").await.unwrap();
        let publisher = EventPublisher::new(
            Arc::clone(&pubsub),
            "routes",
            Duration::from_millis(10),
            Arc::new(NoOpCollector),
        );

        publisher.schedule_event("svc-a");

        let received = tokio::time::timeout(Duration::from_secs(1), {
            use tokio_stream::StreamExt;
            stream.next()
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        let event: RouteChangeEvent = serde_json::from_str(&received).unwrap();
        assert_eq!(event.event_type, RouteChangeEventType::RouteChange);
        assert_eq!(event.services, vec!["svc-a".to_string()]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(publisher.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_event_bypasses_debouncing() {
        let pubsub = Arc::new(InMemoryPubSub::new());
        let mut stream = pubsub.subscribe("routes").await.unwrap();
        let publisher = EventPublisher::new(
            Arc::clone(&pubsub),
            "routes",
            Duration::from_secs(30),
            Arc::new(NoOpCollector),
        );

        publisher
            .send_event(
                RouteChangeEventType::ClientAccessControlUpdated,
                vec!["svc-a".to_string()],
                vec![],
            )
            .await
            .unwrap();

        use tokio_stream::StreamExt;
        let received = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: RouteChangeEvent = serde_json::from_str(&received).unwrap();
        assert_eq!(event.event_type, RouteChangeEventType::ClientAccessControlUpdated);
    }
}
