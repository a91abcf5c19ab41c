//! Hybrid Two-Tier Cache
//!
//! A caching library that pairs a process-local in-memory tier with a shared
//! Redis tier and keeps the local tiers of cooperating instances coherent
//! over a pub/sub invalidation bus:
//!
//! - **Local tier**: bounded in-memory store (Moka) with per-entry TTL,
//!   sub-microsecond reads on hot keys
//! - **Redis tier**: single source of truth, reached through a reconnecting
//!   `ConnectionManager`
//! - **Invalidation bus**: every write/remove broadcasts the affected keys;
//!   peers drop their local copies, the writer's copy survives via
//!   self-loopback suppression
//! - **Distributed locks**: token-owned, expirable, extendable, releasable
//! - **Pattern engine**: cursor-scan enumeration and batched bulk removal
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hybrid_cache::{HybridCache, HybridCacheOptions, EntryOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hybrid_cache::CacheError> {
//!     let cache = HybridCache::connect(
//!         HybridCacheOptions::new("app", "redis://127.0.0.1:6379"),
//!     )
//!     .await?;
//!
//!     let entry = EntryOptions::new()
//!         .local_expiry(Duration::from_secs(60))
//!         .redis_expiry(Duration::from_secs(600));
//!     cache.set("user:1", &serde_json::json!({"name": "alice"}), &entry).await?;
//!
//!     if let Some(user) = cache.get::<serde_json::Value>("user:1").await? {
//!         tracing::info!(%user, "cache hit");
//!     }
//!
//!     cache.close();
//!     Ok(())
//! }
//! ```
//!
//! # Consistency model
//!
//! Eventually consistent across instances: after a `set` or `remove`
//! completes on instance A, instance B's local copy is gone once the
//! invalidation message is delivered and processed. Writes to a single key
//! from a single caller are totally ordered; no ordering exists between
//! distinct keys. Entries populated by read-through never outlive the remote
//! key's TTL.
//!
//! # Degraded mode
//!
//! With `abort_on_connect_fail` disabled, a failed initial connect leaves the
//! instance serving the local tier only. Remote errors are surfaced or
//! swallowed per `throw_on_distributed_error`.

pub mod blocking;
pub mod bus;
pub mod cache;
pub mod codec;
pub mod error;
pub mod expiry;
pub mod keyspace;
pub mod local_store;
pub mod lock;
pub mod options;
pub mod pattern;
pub mod redis_client;

pub use bus::{InvalidationBus, InvalidationMessage, InvalidationStats};
pub use cache::{HybridCache, HybridCacheStats};
pub use codec::{CacheCodec, JsonCodec};
pub use error::{CacheError, Result};
pub use expiry::resolve_local_ttl;
pub use keyspace::Keyspace;
pub use local_store::{LocalStore, LocalStoreStats};
pub use lock::{LockGuard, LockManager};
pub use options::{CommandFlags, EntryOptions, HybridCacheOptions, SetCondition};
pub use pattern::{KeyScan, PatternEngine};
pub use redis_client::{KeyTtl, RedisClient, ServerFeatures, ServerInfo};
