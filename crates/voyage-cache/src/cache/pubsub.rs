//! Cross-instance invalidation.
//!
//! Every successful write publishes an [`InvalidationMessage`]; each process
//! subscribes and evicts the key from its memory tier, ignoring messages it
//! originated itself.
//!
//! ```text
//! Instance 1: set("product:7")
//!   -> remote write, memory write
//!   -> PUBLISH voyage:cache:invalidate {"key":"product:7","originator_id":"...",...}
//! Instance 2: receives message -> evicts "product:7" from memory
//! Instance 1: receives own message -> ignored
//! ```
//!
//! Delivery is at-least-once and unordered across keys; handlers must be
//! idempotent (evicting an absent key is a no-op).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::task::{BackgroundTask, shutdown_requested};
use crate::error::CacheError;
use crate::key::CacheKey;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Capacity of the in-process broadcast channel.
pub const LOCAL_BUS_CAPACITY: usize = 1024;

/// "Key `key` changed; drop any local copy."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub key: CacheKey,
    /// Instance id of the orchestrator that performed the write.
    pub originator_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

impl InvalidationMessage {
    pub fn new(key: CacheKey, originator_id: Uuid) -> Self {
        Self {
            key,
            originator_id,
            issued_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Callback invoked for every received message.
pub type InvalidationHandler = Arc<dyn Fn(InvalidationMessage) + Send + Sync>;

/// A running subscription; stop it to unsubscribe.
pub type Subscription = BackgroundTask;

/// Publish/subscribe channel for invalidation messages.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError>;

    /// Deliver every subsequently published message to `handler` until the
    /// returned subscription is stopped.
    fn subscribe(&self, handler: InvalidationHandler) -> Subscription;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Redis pub/sub bus.
///
/// Publishing uses the shared pool; the subscription runs on a dedicated
/// pub/sub connection and reconnects with exponential backoff
/// (1s doubling, capped at 5 minutes).
pub struct RedisInvalidationBus {
    pool: Pool,
    redis_url: String,
    channel: String,
}

impl RedisInvalidationBus {
    pub fn new(pool: Pool, redis_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(message).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut conn = self.pool.get().await?;
        conn.publish::<_, _, ()>(&self.channel, payload).await?;

        tracing::debug!(key = %message.key, channel = %self.channel, "published cache invalidation");
        Ok(())
    }

    fn subscribe(&self, handler: InvalidationHandler) -> Subscription {
        let redis_url = self.redis_url.clone();
        let channel = self.channel.clone();

        BackgroundTask::spawn("invalidation-subscriber", move |mut shutdown_rx| async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                let outcome = tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    outcome = run_subscription(&redis_url, &channel, &handler) => outcome,
                };

                match outcome {
                    Ok(()) => {
                        // Connection closed gracefully, reset backoff
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Cache invalidation listener error, reconnecting..."
                        );
                        tokio::select! {
                            _ = shutdown_requested(&mut shutdown_rx) => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }

            tracing::info!(channel = %channel, "Cache invalidation listener stopped");
        })
    }
}

async fn run_subscription(
    redis_url: &str,
    channel: &str,
    handler: &InvalidationHandler,
) -> Result<(), String> {
    use futures_util::StreamExt;

    // Dedicated client: pooled connections cannot enter subscriber mode.
    let client = redis::Client::open(redis_url)
        .map_err(|e| format!("failed to create Redis client: {e}"))?;

    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| format!("failed to subscribe: {e}"))?;

    tracing::info!(channel = %channel, "Subscribed to cache invalidation channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload = match msg.get_payload::<String>() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read invalidation message payload");
                continue;
            }
        };
        match serde_json::from_str::<InvalidationMessage>(&payload) {
            Ok(message) => handler(message),
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "malformed invalidation message");
            }
        }
    }

    Err("pub/sub connection closed".to_string())
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Broadcast-channel bus shared by every orchestrator in one process.
#[derive(Clone)]
pub struct LocalInvalidationBus {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl Default for LocalInvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalInvalidationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOCAL_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl InvalidationBus for LocalInvalidationBus {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn publish(&self, message: &InvalidationMessage) -> Result<(), CacheError> {
        // No subscribers is not an error.
        let _ = self.sender.send(message.clone());
        Ok(())
    }

    fn subscribe(&self, handler: InvalidationHandler) -> Subscription {
        let mut receiver = self.sender.subscribe();

        BackgroundTask::spawn("invalidation-subscriber", move |mut shutdown_rx| async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    received = receiver.recv() => received,
                };

                match received {
                    Ok(message) => handler(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "invalidation subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Background publisher fed by a bounded queue.
///
/// Writers enqueue and return; a full queue applies backpressure to the
/// writer rather than dropping the message. Publish failures are logged.
pub(crate) struct InvalidationPublisher {
    queue: Mutex<Option<mpsc::Sender<InvalidationMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationPublisher {
    /// Spawn the publisher task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(bus: Arc<dyn InvalidationBus>, capacity: usize) -> Self {
        let (queue, mut rx) = mpsc::channel::<InvalidationMessage>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = bus.publish(&message).await {
                    tracing::warn!(
                        key = %message.key,
                        bus = bus.name(),
                        error = %e,
                        "failed to publish cache invalidation"
                    );
                }
            }
            tracing::debug!("invalidation publisher drained");
        });

        Self {
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) async fn enqueue(&self, message: InvalidationMessage) {
        let queue = self.queue.lock().clone();
        match queue {
            Some(queue) => {
                if let Err(e) = queue.send(message).await {
                    tracing::warn!(key = %e.0.key, "invalidation publisher stopped, message dropped");
                }
            }
            None => {
                tracing::debug!(key = %message.key, "invalidation publisher shut down, message dropped");
            }
        }
    }

    /// Close the queue and wait until every queued message was published.
    pub(crate) async fn shutdown(&self) {
        drop(self.queue.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "invalidation publisher ended abnormally");
            }
        }
    }
}
