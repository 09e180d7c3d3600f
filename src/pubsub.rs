//! The shared pub/sub substrate (spec.md §6's "named channel on the shared
//! substrate") that carries `RouteChangeEvent` from the Registry's
//! publisher (C15) to every Gateway replica's subscriber (C13), and backs
//! the Fallback Scheduler's (C14) liveness probe.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pub/sub transport error: {0}")]
    Transport(String),
}

/// Message stream item: the raw payload bytes for one publish.
pub type MessageStream = BoxStream<'static, Result<String, PubSubError>>;

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError>;
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, PubSubError>;
    /// Liveness probe used by the Fallback Scheduler.
    async fn ping(&self) -> Result<(), PubSubError>;
}

/// Redis-backed transport, matching `meridian-cache`'s `ConnectionManager`
/// usage for the shared substrate.
pub struct RedisPubSub {
    manager: ConnectionManager,
    client: redis::Client,
}

impl RedisPubSub {
    pub async fn connect(redis_url: &str) -> Result<Self, PubSubError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PubSubError::Transport(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| PubSubError::Transport(e.to_string()))?;
        Ok(Self { manager, client })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        let mut conn = self.manager.clone();
        conn.publish(channel, payload)
            .await
            .map_err(|e| PubSubError::Transport(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, PubSubError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| PubSubError::Transport(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| PubSubError::Transport(e.to_string()))?;

        let stream = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>()
                .map_err(|e| PubSubError::Transport(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<(), PubSubError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| PubSubError::Transport(e.to_string()))
    }
}

/// Single-process test double used by unit tests and the in-process
/// integration tests; channels are kept distinct per name.
pub struct InMemoryPubSub {
    channels: dashmap::DashMap<String, broadcast::Sender<String>>,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self {
            channels: dashmap::DashMap::new(),
        }
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        // No subscribers is not an error for a fire-and-forget channel.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, PubSubError> {
        let rx = self.sender(channel).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|item| match item {
            Ok(payload) => Some(Ok(payload)),
            Err(_lagged) => None,
        });
        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<(), PubSubError> {
        Ok(())
    }
}
