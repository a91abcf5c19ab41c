//! Shared integration-test infrastructure
//!
//! Every test runs under its own namespace so suites never observe each
//! other's keys or invalidations. Tests skip gracefully when no Redis is
//! reachable at `REDIS_URL` (default `redis://127.0.0.1:6379`).

#![allow(dead_code)]

use hybrid_cache::{HybridCache, HybridCacheOptions};
use std::time::Duration;

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Unique namespace per test run
pub fn test_namespace(name: &str) -> String {
    format!("hct-{}-{}", name, rand_suffix())
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64;
    let pid = std::process::id() as u64;
    (pid << 32) ^ nanos
}

pub fn options(namespace: &str) -> HybridCacheOptions {
    HybridCacheOptions::new(namespace, redis_url())
        .connection_timeout(Duration::from_secs(2))
        // keep stray test keys from outliving the run by much
        .default_expiration(Duration::from_secs(180))
}

/// Route library logs through the test harness; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Connect, or `None` when Redis is unreachable (the test then skips)
pub async fn try_connect(namespace: &str) -> Option<HybridCache> {
    init_tracing();
    match HybridCache::connect(options(namespace)).await {
        Ok(cache) => Some(cache),
        Err(err) => {
            eprintln!("skipping test - Redis not available: {err}");
            None
        }
    }
}

pub async fn try_connect_with(options: HybridCacheOptions) -> Option<HybridCache> {
    init_tracing();
    match HybridCache::connect(options).await {
        Ok(cache) => Some(cache),
        Err(err) => {
            eprintln!("skipping test - Redis not available: {err}");
            None
        }
    }
}

/// Test data in the shapes the cache is expected to carry
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }

    /// Closed polymorphic set carried through the cache
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum Payload {
        Text { body: String },
        Counter { value: i64 },
    }
}
