//! Cross-instance invalidation bus
//!
//! Every write or remove publishes an invalidation notice on the namespace's
//! pub/sub channel; peer instances react by dropping the listed keys from
//! their local store. Messages carry the originating instance id so that the
//! publisher's own fresh copy survives its own broadcast.
//!
//! The wire schema is pinned and part of the cross-instance contract:
//!
//! ```json
//! {"instanceId": "<uuid>", "cacheKeys": ["<scoped key>", ...]}
//! ```

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::{CacheError, Result};
use crate::local_store::SharedLocalStore;
use crate::redis_client::RedisClient;

/// Delay before re-subscribing after a transport failure
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Invalidation notice as carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    /// Process-unique id of the publishing instance
    pub instance_id: String,
    /// Scoped keys to drop from peer local stores
    pub cache_keys: Vec<String>,
}

impl InvalidationMessage {
    pub fn new(instance_id: impl Into<String>, cache_keys: Vec<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            cache_keys,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Monotonic per-instance bus counters; reset only on process restart
#[derive(Debug, Default)]
struct AtomicBusStats {
    published: AtomicU64,
    publish_retries: AtomicU64,
    publish_failures: AtomicU64,
    received: AtomicU64,
    dropped_self: AtomicU64,
    keys_invalidated: AtomicU64,
    processing_errors: AtomicU64,
}

/// Snapshot of the bus counters
#[derive(Debug, Clone, Default)]
pub struct InvalidationStats {
    pub published: u64,
    pub publish_retries: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub dropped_self: u64,
    pub keys_invalidated: u64,
    pub processing_errors: u64,
}

impl AtomicBusStats {
    fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            published: self.published.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped_self: self.dropped_self.load(Ordering::Relaxed),
            keys_invalidated: self.keys_invalidated.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Publisher and subscriber for the namespace's invalidation channel
pub struct InvalidationBus {
    redis: RedisClient,
    channel: String,
    instance_id: String,
    retry_count: u32,
    retry_base: Duration,
    batch_size: usize,
    stats: Arc<AtomicBusStats>,
    shutdown_tx: broadcast::Sender<()>,
}

impl InvalidationBus {
    pub fn new(
        redis: RedisClient,
        channel: String,
        instance_id: String,
        retry_count: u32,
        retry_base: Duration,
        batch_size: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            redis,
            channel,
            instance_id,
            retry_count,
            retry_base,
            batch_size,
            stats: Arc::new(AtomicBusStats::default()),
            shutdown_tx,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }

    /// Publish an invalidation notice for the given scoped keys, split into
    /// batches to respect the transport's message size. Each batch is retried
    /// with linear backoff (`delay = base * attempt`) up to the retry cap;
    /// the error of the final attempt is returned for the caller to surface
    /// or swallow per its error policy.
    pub async fn publish_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for chunk in keys.chunks(self.batch_size) {
            let message = InvalidationMessage::new(self.instance_id.clone(), chunk.to_vec());
            let payload = message.to_json()?;
            self.publish_with_retry(&payload, chunk.len()).await?;
        }
        Ok(())
    }

    async fn publish_with_retry(&self, payload: &str, key_count: usize) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.redis.publish(&self.channel, payload).await {
                Ok(()) => {
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) if attempt <= self.retry_count => {
                    self.stats.publish_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %err,
                        attempt,
                        key_count,
                        "invalidation publish failed, retrying"
                    );
                    tokio::time::sleep(self.retry_base * attempt).await;
                }
                Err(err) => {
                    self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                    error!(error = %err, key_count, "invalidation publish exhausted retries");
                    return Err(err);
                }
            }
        }
    }

    /// Start the background subscriber. The handler only removes keys from
    /// the local store; anything heavier belongs on the caller side of the
    /// bus. Re-subscribes with a fixed delay after transport failures; on a
    /// successful re-subscribe the local store is flushed when
    /// `flush_on_reconnect` is set, since messages missed while disconnected
    /// could leave stale entries behind.
    pub fn start_subscriber(
        &self,
        local: SharedLocalStore,
        flush_on_reconnect: bool,
    ) -> tokio::task::JoinHandle<()> {
        let client = self.redis.pubsub_client().clone();
        let channel = self.channel.clone();
        let instance_id = self.instance_id.clone();
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut connected_before = false;
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                match Self::run_subscriber_loop(
                    &client,
                    &channel,
                    &instance_id,
                    &local,
                    &stats,
                    flush_on_reconnect,
                    &mut connected_before,
                    &mut shutdown_rx,
                )
                .await
                {
                    Ok(()) => {
                        info!("invalidation subscriber stopped");
                        break;
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            "invalidation subscription lost, reconnecting in {}s",
                            RECONNECT_DELAY.as_secs()
                        );
                        stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                        tokio::select! {
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_subscriber_loop(
        client: &redis::Client,
        channel: &str,
        instance_id: &str,
        local: &SharedLocalStore,
        stats: &Arc<AtomicBusStats>,
        flush_on_reconnect: bool,
        connected_before: &mut bool,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        if *connected_before {
            if flush_on_reconnect {
                local.clear();
                info!(channel = %channel, "bus resubscribed, local store flushed");
            } else {
                info!(channel = %channel, "bus resubscribed, local store left in place");
            }
        } else {
            info!(channel = %channel, "subscribed to invalidation channel");
        }
        *connected_before = true;

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(CacheError::Other("pub/sub message stream ended".into()));
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(err) => {
                            warn!(error = %err, "unreadable invalidation payload");
                            stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };
                    match InvalidationMessage::from_json(&payload) {
                        Ok(message) => {
                            Self::apply(&message, instance_id, local, stats).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "undecodable invalidation message");
                            stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    /// Receiver logic: drop self-originated messages, otherwise remove every
    /// listed key from the local store. Returns whether the message applied.
    async fn apply(
        message: &InvalidationMessage,
        instance_id: &str,
        local: &SharedLocalStore,
        stats: &Arc<AtomicBusStats>,
    ) -> bool {
        stats.received.fetch_add(1, Ordering::Relaxed);
        if message.instance_id == instance_id {
            stats.dropped_self.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        for key in &message.cache_keys {
            local.remove(key).await;
        }
        stats
            .keys_invalidated
            .fetch_add(message.cache_keys.len() as u64, Ordering::Relaxed);
        true
    }

    /// Signal the subscriber task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for InvalidationBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
