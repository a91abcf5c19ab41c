//! Hybrid cache orchestrator
//!
//! Composes the local store, the Redis facade, the invalidation bus, the
//! lock manager, and the pattern engine behind the public read/write/remove
//! surface. Redis is the source of truth; the local tier is a bounded replica
//! kept coherent by the bus.
//!
//! Error policy: transport failures are surfaced when
//! `throw_on_distributed_error` is set, otherwise swallowed with a log; the
//! read path then falls back to the local tier and the write path still
//! updates it. Validation, protocol, and serialization errors always surface.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::bus::{InvalidationBus, InvalidationStats};
use crate::codec::{CacheCodec, JsonCodec};
use crate::error::{CacheError, Result};
use crate::expiry::resolve_local_ttl;
use crate::keyspace::Keyspace;
use crate::local_store::{LocalStore, LocalStoreStats, SharedLocalStore};
use crate::lock::{LockGuard, LockManager};
use crate::options::{CommandFlags, EntryOptions, HybridCacheOptions};
use crate::pattern::{KeyScan, PatternEngine};
use crate::redis_client::{KeyTtl, RedisClient, ServerFeatures};

/// Removes the in-flight entry even on early return or panic
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Outcome of one tiered write, before any broadcast
struct WriteOutcome {
    /// `false` iff an `NX`/`XX` condition rejected the write
    accepted: bool,
    /// The Redis tier holds the new value
    remote_written: bool,
    /// The local tier holds the new value
    local_written: bool,
    scoped: String,
}

impl WriteOutcome {
    /// Every accepted local write broadcasts, even when the remote write was
    /// skipped or swallowed, so peers never serve a copy the writer replaced
    fn broadcast_worthy(&self) -> bool {
        self.accepted && (self.remote_written || self.local_written)
    }
}

/// Counter snapshot across both tiers and the bus
#[derive(Debug, Clone, Default)]
pub struct HybridCacheStats {
    pub local: LocalStoreStats,
    pub remote_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub removals: u64,
    pub bus: Option<InvalidationStats>,
}

/// Two-tier cache with cross-instance coherency
///
/// # Example
///
/// ```rust,no_run
/// use hybrid_cache::{HybridCache, HybridCacheOptions, EntryOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), hybrid_cache::CacheError> {
///     let cache = HybridCache::connect(
///         HybridCacheOptions::new("app", "redis://127.0.0.1:6379"),
///     )
///     .await?;
///
///     cache.set("user:1", &serde_json::json!({"name": "alice"}), &EntryOptions::new()).await?;
///     let user: Option<serde_json::Value> = cache.get("user:1").await?;
///     assert!(user.is_some());
///     Ok(())
/// }
/// ```
pub struct HybridCache {
    options: HybridCacheOptions,
    keyspace: Keyspace,
    codec: JsonCodec,
    local: SharedLocalStore,
    remote: Option<RedisClient>,
    bus: Option<InvalidationBus>,
    locks: Option<LockManager>,
    patterns: Option<PatternEngine>,
    instance_id: String,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    removals: AtomicU64,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HybridCache {
    /// Connect and subscribe to the invalidation channel.
    ///
    /// When the initial connect fails and `abort_on_connect_fail` is off,
    /// the instance comes up in degraded local-only mode: reads and writes
    /// use the local tier, remote-touching operations obey the error policy,
    /// and locks/pattern operations report the remote tier as unavailable.
    pub async fn connect(options: HybridCacheOptions) -> Result<Self> {
        options.validate()?;
        let keyspace = Keyspace::new(options.namespace.clone())?;
        let local: SharedLocalStore = Arc::new(LocalStore::new(options.local_capacity));
        let instance_id = Uuid::new_v4().to_string();
        let (shutdown_tx, _) = broadcast::channel(1);

        let remote = match RedisClient::connect(&options).await {
            Ok(client) => Some(client),
            Err(err) if !options.abort_on_connect_fail => {
                warn!(
                    error = %err,
                    "initial redis connect failed, degrading to local-only mode"
                );
                None
            }
            Err(err) => return Err(err),
        };

        let bus = remote.as_ref().map(|client| {
            InvalidationBus::new(
                client.clone(),
                keyspace.channel(),
                instance_id.clone(),
                options.bus_retry_count,
                options.bus_retry_base_delay,
                options.invalidation_batch_size,
            )
        });

        let mut tasks = Vec::new();
        if let Some(bus) = &bus {
            tasks.push(bus.start_subscriber(
                Arc::clone(&local),
                options.flush_local_on_bus_reconnect,
            ));
        }
        if let (Some(client), Some(cadence)) = (&remote, options.keep_alive) {
            if !cadence.is_zero() {
                tasks.push(Self::start_keepalive(
                    client.clone(),
                    cadence,
                    shutdown_tx.subscribe(),
                ));
            }
        }

        let locks = remote
            .as_ref()
            .map(|client| LockManager::new(client.clone(), keyspace.clone()));
        let patterns = remote
            .as_ref()
            .map(|client| PatternEngine::new(client.clone(), options.scan_page_size));

        info!(
            namespace = %options.namespace,
            instance_id = %instance_id,
            degraded = remote.is_none(),
            "hybrid cache ready"
        );

        Ok(Self {
            options,
            keyspace,
            codec: JsonCodec,
            local,
            remote,
            bus,
            locks,
            patterns,
            instance_id,
            in_flight: DashMap::new(),
            remote_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            tasks: std::sync::Mutex::new(tasks),
            shutdown_tx,
        })
    }

    fn start_keepalive(
        client: RedisClient,
        cadence: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = client.ping().await {
                            warn!(error = %err, "keepalive ping failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Process-unique id carried on every invalidation message
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// `true` when the remote tier is unavailable and the instance serves
    /// from the local tier only
    pub fn is_degraded(&self) -> bool {
        self.remote.is_none()
    }

    pub fn options(&self) -> &HybridCacheOptions {
        &self.options
    }

    fn remote(&self) -> Result<&RedisClient> {
        self.remote.as_ref().ok_or(CacheError::Disconnected)
    }

    fn locks(&self) -> Result<&LockManager> {
        self.locks.as_ref().ok_or(CacheError::Disconnected)
    }

    fn patterns(&self) -> Result<&PatternEngine> {
        self.patterns.as_ref().ok_or(CacheError::Disconnected)
    }

    /// Surface or swallow per the distributed-error policy
    fn absorb<T>(&self, result: Result<T>, default: T, context: &'static str) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_transport() && !self.options.throw_on_distributed_error => {
                warn!(error = %err, context, "redis error swallowed, continuing with local tier");
                Ok(default)
            }
            Err(err) => Err(err),
        }
    }

    // ===== Read =====

    /// Two-tier read: local hit, else Redis read-through that populates the
    /// local tier with a TTL clamped by the remote key's remaining lifetime.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let scoped = self.keyspace.scope(key)?;
        if let Some(value) = self.local.get(&scoped).await {
            if self.options.enable_tracing {
                trace!(key = %scoped, "local hit");
            }
            return Ok(Some(serde_json::from_value(value)?));
        }

        let fetched = self.fetch_through(&scoped).await;
        match self.absorb(fetched, None, "get")? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Read through Redis and populate the local tier
    async fn fetch_through(&self, scoped: &str) -> Result<Option<serde_json::Value>> {
        let remote = self.remote()?;
        let Some(bytes) = remote.string_get(scoped).await? else {
            return Ok(None);
        };
        let value: serde_json::Value = self.codec.decode(&bytes)?;

        let remaining = match remote.key_ttl(scoped).await? {
            // expired between GET and PTTL; do not let it linger locally
            KeyTtl::Missing => Some(Duration::ZERO),
            KeyTtl::NoExpiry => None,
            KeyTtl::Remaining(d) => Some(d),
        };
        let local_ttl = resolve_local_ttl(None, remaining, self.options.default_expiration);
        self.local.insert(scoped, value.clone(), local_ttl).await;
        self.remote_hits.fetch_add(1, Ordering::Relaxed);

        if self.options.enable_logging {
            debug!(key = %scoped, ttl_ms = %local_ttl.as_millis(), "read-through populated local tier");
        }
        Ok(Some(value))
    }

    /// Return the cached value, or run `producer`, store its result with the
    /// default options, and return it. Concurrent callers for the same key
    /// are coalesced so the producer runs once per miss.
    pub async fn get_or_create<T, F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scoped = self.keyspace.scope(key)?;
        if let Some(value) = self.local.get(&scoped).await {
            return Ok(serde_json::from_value(value)?);
        }

        let gate = self
            .in_flight
            .entry(scoped.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;
        let _cleanup = CleanupGuard {
            map: &self.in_flight,
            key: scoped.clone(),
        };

        // a coalesced waiter may find the value populated meanwhile
        if let Some(value) = self.local.get(&scoped).await {
            return Ok(serde_json::from_value(value)?);
        }
        let fetched = self.fetch_through(&scoped).await;
        if let Some(value) = self.absorb(fetched, None, "get_or_create")? {
            return Ok(serde_json::from_value(value)?);
        }

        let produced = producer().await?;
        self.set(key, &produced, &EntryOptions::new()).await?;
        Ok(produced)
    }

    // ===== Write =====

    /// Tiered write. Returns `Ok(false)` iff an `IfNotExists`/`IfExists`
    /// condition rejected it; in that case neither tier is modified and no
    /// invalidation is broadcast. On success the scoped key is broadcast so
    /// peers drop their stale copies; this instance's own copy survives via
    /// self-loopback suppression.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        entry: &EntryOptions,
    ) -> Result<bool> {
        let outcome = self.write_tiers(key, value, entry).await?;
        if !outcome.accepted {
            return Ok(false);
        }
        if outcome.broadcast_worthy() {
            self.broadcast(std::slice::from_ref(&outcome.scoped)).await?;
        }
        Ok(true)
    }

    /// Write every entry sequentially under the same policy, then publish a
    /// single consolidated invalidation for the successfully written keys.
    /// With `throw_on_distributed_error` set, the first remote failure aborts
    /// and leaves the partially written state as-is.
    ///
    /// Returns `Ok(false)` when at least one conditional write did not fire.
    pub async fn set_all<T: Serialize>(
        &self,
        entries: &[(String, T)],
        entry: &EntryOptions,
    ) -> Result<bool> {
        if entries.is_empty() {
            return Err(CacheError::Validation("entry set must not be empty".into()));
        }
        let mut all_accepted = true;
        let mut written: Vec<String> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let outcome = self.write_tiers(key, value, entry).await?;
            if !outcome.accepted {
                all_accepted = false;
            } else if outcome.broadcast_worthy() {
                written.push(outcome.scoped);
            }
        }
        self.broadcast(&written).await?;
        Ok(all_accepted)
    }

    /// The write algorithm shared by `set` and `set_all`: Redis first (so a
    /// rejected condition leaves the local tier untouched), then the local
    /// tier with a TTL clamped by the remote expiry.
    async fn write_tiers<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        entry: &EntryOptions,
    ) -> Result<WriteOutcome> {
        let scoped = self.keyspace.scope(key)?;
        let json = serde_json::to_value(value)?;

        let mut remote_written = false;
        let mut remote_ttl = None;
        if entry.redis_enabled() {
            let ttl = Some(entry.redis_expiry.unwrap_or(self.options.default_expiration));
            let attempt = match self.remote() {
                Ok(remote) => {
                    let bytes = self.codec.encode(&json)?;
                    remote
                        .string_set(&scoped, &bytes, ttl, entry.when, entry.keep_ttl, entry.flags)
                        .await
                }
                Err(err) => Err(err),
            };
            match attempt {
                Ok(true) => {
                    remote_written = true;
                    remote_ttl = if entry.keep_ttl {
                        // the pre-existing TTL survived; ask for it so the
                        // local copy cannot outlive the remote key
                        match self.remote()?.key_ttl(&scoped).await {
                            Ok(KeyTtl::Remaining(d)) => Some(d),
                            Ok(_) => None,
                            Err(err) => {
                                self.absorb(Err::<(), _>(err), (), "set keep_ttl probe")?;
                                None
                            }
                        }
                    } else {
                        ttl
                    };
                }
                Ok(false) => {
                    return Ok(WriteOutcome {
                        accepted: false,
                        remote_written: false,
                        local_written: false,
                        scoped,
                    });
                }
                Err(err) => {
                    self.absorb(Err::<(), _>(err), (), "set")?;
                }
            }
        }

        let local_written = entry.local_enabled();
        if local_written {
            let local_ttl = resolve_local_ttl(
                entry.local_expiry,
                if remote_written { remote_ttl } else { None },
                self.options.default_expiration,
            );
            self.local.insert(&scoped, json, local_ttl).await;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        if self.options.enable_logging {
            debug!(
                key = %scoped,
                remote_written,
                local = local_written,
                "set"
            );
        }
        Ok(WriteOutcome {
            accepted: true,
            remote_written,
            local_written,
            scoped,
        })
    }

    async fn broadcast(&self, scoped_keys: &[String]) -> Result<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let result = bus.publish_keys(scoped_keys).await;
        self.absorb(result, (), "invalidation publish")
    }

    // ===== Remove =====

    /// Remove keys from both tiers and broadcast the drop. Idempotent: keys
    /// already absent contribute nothing to the count. Returns the number of
    /// keys the remote tier actually deleted.
    pub async fn remove(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Err(CacheError::Validation("key list must not be empty".into()));
        }
        let scoped: Vec<String> = keys
            .iter()
            .map(|k| self.keyspace.scope(k))
            .collect::<Result<_>>()?;

        for key in &scoped {
            self.local.remove(key).await;
        }
        let attempt = match self.remote() {
            Ok(remote) => remote.key_delete(&scoped, CommandFlags::default()).await,
            Err(err) => Err(err),
        };
        let count = self.absorb(attempt, 0, "remove")?;
        self.removals.fetch_add(count, Ordering::Relaxed);
        self.broadcast(&scoped).await?;
        Ok(count)
    }

    /// Scan-and-delete every key whose unscoped form matches the glob
    /// pattern, in batches of `batch_size`, then drop local copies and
    /// broadcast one consolidated invalidation. Returns the removed count
    /// (dispatched count under fire-and-forget).
    pub async fn remove_by_pattern(
        &self,
        pattern: &str,
        flags: CommandFlags,
        batch_size: usize,
    ) -> Result<u64> {
        let scoped_pattern = self.keyspace.scope_pattern(pattern)?;
        let attempt = match self.patterns() {
            Ok(engine) => engine.remove_matching(&scoped_pattern, batch_size, flags).await,
            Err(err) => Err(err),
        };
        let (count, removed_keys) = self.absorb(attempt, (0, Vec::new()), "remove_by_pattern")?;

        for key in &removed_keys {
            self.local.remove(key).await;
        }
        self.removals.fetch_add(count, Ordering::Relaxed);
        self.broadcast(&removed_keys).await?;

        if self.options.enable_logging {
            debug!(pattern = %scoped_pattern, count, "pattern removal");
        }
        Ok(count)
    }

    /// Like [`remove_by_pattern`](Self::remove_by_pattern) but skips the
    /// local drop and the invalidation broadcast, for callers who know no
    /// instance holds a local copy of the matched keys.
    pub async fn remove_by_pattern_redis_only(
        &self,
        pattern: &str,
        flags: CommandFlags,
        batch_size: usize,
    ) -> Result<u64> {
        let scoped_pattern = self.keyspace.scope_pattern(pattern)?;
        let attempt = match self.patterns() {
            Ok(engine) => engine.remove_matching(&scoped_pattern, batch_size, flags).await,
            Err(err) => Err(err),
        };
        let (count, _) = self.absorb(attempt, (0, Vec::new()), "remove_by_pattern_redis_only")?;
        self.removals.fetch_add(count, Ordering::Relaxed);
        Ok(count)
    }

    /// Drop every entry of this instance's local tier. Peers are unaffected.
    pub fn clear_local(&self) {
        self.local.clear();
    }

    /// Flush the Redis database and the local tier. Requires `allow_admin`.
    pub async fn clear_all(&self) -> Result<()> {
        if !self.options.allow_admin {
            return Err(CacheError::AdminDisabled("clear_all"));
        }
        let attempt = match self.remote() {
            Ok(remote) => remote.flush_db().await,
            Err(err) => Err(err),
        };
        self.absorb(attempt, (), "clear_all")?;
        self.clear_local();
        Ok(())
    }

    // ===== Inspect =====

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let scoped = self.keyspace.scope(key)?;
        if self.local.get(&scoped).await.is_some() {
            return Ok(true);
        }
        let attempt = match self.remote() {
            Ok(remote) => remote.key_exists(&scoped).await,
            Err(err) => Err(err),
        };
        self.absorb(attempt, false, "exists")
    }

    /// Remaining remote TTL; `None` for a missing key or one without expiry
    pub async fn get_expiration(&self, key: &str) -> Result<Option<Duration>> {
        let scoped = self.keyspace.scope(key)?;
        match self.remote()?.key_ttl(&scoped).await? {
            KeyTtl::Remaining(d) => Ok(Some(d)),
            KeyTtl::Missing | KeyTtl::NoExpiry => Ok(None),
        }
    }

    /// Absolute remote expiry timestamp (`EXPIRETIME`, Redis 7.0+)
    pub async fn get_absolute_expiration(&self, key: &str) -> Result<Option<SystemTime>> {
        let scoped = self.keyspace.scope(key)?;
        self.remote()?.key_expire_time(&scoped).await
    }

    /// Lazy enumeration of the scoped keys whose unscoped form matches the
    /// glob pattern. Consume once; not restartable.
    pub fn keys(&self, pattern: &str) -> Result<KeyScan> {
        let scoped_pattern = self.keyspace.scope_pattern(pattern)?;
        Ok(self.patterns()?.scan(&scoped_pattern))
    }

    /// Key count of the Redis database. Requires `allow_admin`.
    pub async fn database_size(&self) -> Result<u64> {
        if !self.options.allow_admin {
            return Err(CacheError::AdminDisabled("database_size"));
        }
        self.remote()?.dbsize().await
    }

    /// Round-trip latency to the server
    pub async fn ping(&self) -> Result<Duration> {
        self.remote()?.ping().await
    }

    /// Server clock
    pub async fn time(&self) -> Result<SystemTime> {
        self.remote()?.time().await
    }

    pub async fn echo(&self, message: &str) -> Result<String> {
        self.remote()?.echo(message).await
    }

    pub async fn server_version(&self) -> Result<String> {
        Ok(self.remote()?.server_info().await?.version)
    }

    /// Capabilities derived from the server version
    pub async fn server_features(&self) -> Result<ServerFeatures> {
        let info = self.remote()?.server_info().await?;
        Ok(ServerFeatures::from_version(&info.version))
    }

    // ===== Locking =====

    /// See [`LockManager::try_lock`]
    pub async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.locks()?.try_lock(key, token, ttl).await
    }

    /// See [`LockManager::try_extend`]
    pub async fn try_extend(&self, key: &str, token: &str, new_ttl: Duration) -> Result<bool> {
        self.locks()?.try_extend(key, token, new_ttl).await
    }

    /// See [`LockManager::try_release`]
    pub async fn try_release(&self, key: &str, token: &str) -> Result<bool> {
        self.locks()?.try_release(key, token).await
    }

    /// Block cooperatively until the lock is held; see [`LockManager::lock_key`]
    pub async fn lock_key(&self, key: &str, ttl: Duration) -> Result<LockGuard> {
        self.locks()?.lock_key(key, ttl).await
    }

    // ===== Lifecycle & stats =====

    pub fn stats(&self) -> HybridCacheStats {
        HybridCacheStats {
            local: self.local.stats(),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            bus: self.bus.as_ref().map(|b| b.stats()),
        }
    }

    pub fn invalidation_stats(&self) -> Option<InvalidationStats> {
        self.bus.as_ref().map(|b| b.stats())
    }

    /// Unsubscribe, stop background tasks, and drop the local tier. The
    /// shared connection closes when the last clone of the facade is dropped.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(bus) = &self.bus {
            bus.shutdown();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.abort();
        }
        self.local.clear();
        info!(instance_id = %self.instance_id, "hybrid cache closed");
    }
}

impl Drop for HybridCache {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
