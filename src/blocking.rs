//! Synchronous facade
//!
//! Wraps the async cache behind a dedicated runtime so non-async callers get
//! the same semantics without an executor of their own. Every remote-touching
//! call is bounded by the `sync_timeout` option.
//!
//! Do not construct this inside an async context: the facade blocks the
//! calling thread, and building it on a runtime worker would deadlock.
//! Construction fails loudly in that case.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::{Builder, Runtime};

use crate::error::{CacheError, Result};
use crate::options::{CommandFlags, EntryOptions, HybridCacheOptions};
use crate::redis_client::ServerFeatures;

/// Blocking counterpart of [`crate::HybridCache`]
pub struct HybridCache {
    inner: Arc<crate::HybridCache>,
    runtime: Runtime,
    sync_timeout: Duration,
}

impl std::fmt::Debug for HybridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}

impl HybridCache {
    pub fn connect(options: HybridCacheOptions) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(CacheError::Other(
                "blocking::HybridCache must not be created inside an async runtime".into(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| CacheError::Other(format!("failed to build runtime: {e}")))?;

        let sync_timeout = options.sync_timeout;
        let inner = runtime.block_on(crate::HybridCache::connect(options))?;
        Ok(Self {
            inner: Arc::new(inner),
            runtime,
            sync_timeout,
        })
    }

    fn run<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.sync_timeout;
        self.runtime.block_on(async move {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| CacheError::Timeout(timeout))?
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.run(self.inner.get(key))
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        entry: &EntryOptions,
    ) -> Result<bool> {
        self.run(self.inner.set(key, value, entry))
    }

    pub fn set_all<T: Serialize>(
        &self,
        entries: &[(String, T)],
        entry: &EntryOptions,
    ) -> Result<bool> {
        self.run(self.inner.set_all(entries, entry))
    }

    pub fn remove(&self, keys: &[&str]) -> Result<u64> {
        self.run(self.inner.remove(keys))
    }

    pub fn remove_by_pattern(
        &self,
        pattern: &str,
        flags: CommandFlags,
        batch_size: usize,
    ) -> Result<u64> {
        self.run(self.inner.remove_by_pattern(pattern, flags, batch_size))
    }

    pub fn clear_local(&self) {
        self.inner.clear_local();
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.run(self.inner.exists(key))
    }

    pub fn get_expiration(&self, key: &str) -> Result<Option<Duration>> {
        self.run(self.inner.get_expiration(key))
    }

    pub fn ping(&self) -> Result<Duration> {
        self.run(self.inner.ping())
    }

    pub fn time(&self) -> Result<SystemTime> {
        self.run(self.inner.time())
    }

    pub fn echo(&self, message: &str) -> Result<String> {
        self.run(self.inner.echo(message))
    }

    pub fn server_version(&self) -> Result<String> {
        self.run(self.inner.server_version())
    }

    pub fn server_features(&self) -> Result<ServerFeatures> {
        self.run(self.inner.server_features())
    }

    pub fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.run(self.inner.try_lock(key, token, ttl))
    }

    pub fn try_extend(&self, key: &str, token: &str, new_ttl: Duration) -> Result<bool> {
        self.run(self.inner.try_extend(key, token, new_ttl))
    }

    pub fn try_release(&self, key: &str, token: &str) -> Result<bool> {
        self.run(self.inner.try_release(key, token))
    }

    pub fn close(self) {
        self.inner.close();
        // the runtime shuts down when `self.runtime` drops here
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn degraded_options() -> HybridCacheOptions {
        HybridCacheOptions::new("blocking-test", "redis://127.0.0.1:1")
            .abort_on_connect_fail(false)
            .connect_retry(1)
            .connection_timeout(Duration::from_millis(200))
    }

    #[test]
    fn blocking_calls_mirror_the_async_surface() {
        let cache = HybridCache::connect(degraded_options()).unwrap();
        assert!(cache.set("k", &json!("v"), &EntryOptions::new()).unwrap());
        let got: Option<serde_json::Value> = cache.get("k").unwrap();
        assert_eq!(got, Some(json!("v")));
        cache.remove(&["k"]).unwrap();
        let got: Option<serde_json::Value> = cache.get("k").unwrap();
        assert_eq!(got, None);
        cache.close();
    }

    #[tokio::test]
    async fn construction_inside_a_runtime_is_refused() {
        let err = HybridCache::connect(degraded_options()).unwrap_err();
        assert!(matches!(err, CacheError::Other(_)));
    }
}
