//! Thin command-level facade over the Redis transport
//!
//! Wraps a `ConnectionManager` (automatic reconnection) and exposes exactly
//! the commands the cache needs. Routing hints ride along as
//! [`CommandFlags`]; fire-and-forget dispatches the command on the runtime
//! without awaiting the acknowledgement.

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::options::{CommandFlags, HybridCacheOptions, SetCondition};

/// Remaining lifetime of a Redis key as reported by `PTTL`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist
    Missing,
    /// The key exists and never expires
    NoExpiry,
    /// The key expires after this duration
    Remaining(Duration),
}

/// Parsed `INFO server` reply
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub version: String,
}

/// Capabilities derived from the server version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerFeatures {
    /// `SET ... KEEPTTL` (6.0+)
    pub keep_ttl: bool,
    /// `GETDEL` (6.2+)
    pub get_del: bool,
    /// `EXPIRETIME` (7.0+)
    pub expire_time: bool,
}

impl ServerFeatures {
    pub fn from_version(version: &str) -> Self {
        let (major, minor) = parse_version(version);
        Self {
            keep_ttl: (major, minor) >= (6, 0),
            get_del: (major, minor) >= (6, 2),
            expire_time: (major, minor) >= (7, 0),
        }
    }
}

fn parse_version(version: &str) -> (u32, u32) {
    let mut parts = version.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

/// Narrow command facade shared by every remote-touching component
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: ConnectionManager,
}

impl RedisClient {
    /// Connect with the configured retry and timeout settings and verify the
    /// link with a PING probe.
    pub async fn connect(options: &HybridCacheOptions) -> Result<Self> {
        info!(redis_url = %options.redis_url, "connecting to redis");

        let client = Client::open(options.redis_url.as_str())?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(options.connection_timeout)
            .set_response_timeout(options.async_timeout)
            .set_number_of_retries(options.connect_retry);

        let manager = ConnectionManager::new_with_config(client.clone(), config).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(redis_url = %options.redis_url, "redis connection established");
        Ok(Self { client, manager })
    }

    /// Client handle for dedicated pub/sub connections
    pub fn pubsub_client(&self) -> &Client {
        &self.client
    }

    /// `SET` with TTL, condition, and keep-TTL semantics.
    ///
    /// Returns `Ok(false)` iff the condition (`NX`/`XX`) rejected the write.
    /// A fire-and-forget dispatch always reports `Ok(true)`.
    pub async fn string_set(
        &self,
        key: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
        condition: SetCondition,
        keep_ttl: bool,
        flags: CommandFlags,
    ) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(bytes);
        if keep_ttl {
            cmd.arg("KEEPTTL");
        } else if let Some(ttl) = ttl {
            cmd.arg("PX").arg(px_millis(ttl));
        }
        match condition {
            SetCondition::Always => {}
            SetCondition::IfNotExists => {
                cmd.arg("NX");
            }
            SetCondition::IfExists => {
                cmd.arg("XX");
            }
        }

        if flags.fire_and_forget {
            let mut conn = self.manager.clone();
            tokio::spawn(async move {
                let reply: redis::RedisResult<Option<String>> = cmd.query_async(&mut conn).await;
                if let Err(err) = reply {
                    warn!(error = %err, "fire-and-forget SET failed");
                }
            });
            return Ok(true);
        }

        let mut conn = self.manager.clone();
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    pub async fn string_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let reply: Option<Vec<u8>> = conn.get(key).await?;
        Ok(reply)
    }

    /// Multi-key delete; returns the number of keys removed. Fire-and-forget
    /// dispatch reports the dispatched-key count instead of the server count.
    pub async fn key_delete(&self, keys: &[String], flags: CommandFlags) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        if flags.fire_and_forget {
            let mut conn = self.manager.clone();
            let owned = keys.to_vec();
            let dispatched = owned.len() as u64;
            tokio::spawn(async move {
                let reply: redis::RedisResult<u64> = conn.del(&owned).await;
                if let Err(err) = reply {
                    warn!(error = %err, "fire-and-forget DEL failed");
                }
            });
            return Ok(dispatched);
        }
        let mut conn = self.manager.clone();
        let count: u64 = conn.del(keys).await?;
        Ok(count)
    }

    pub async fn key_exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// Remaining TTL via `PTTL` (millisecond precision)
    pub async fn key_ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.manager.clone();
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        match millis {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::NoExpiry),
            ms if ms >= 0 => Ok(KeyTtl::Remaining(Duration::from_millis(ms as u64))),
            other => Err(CacheError::Protocol(format!(
                "unexpected PTTL reply: {other}"
            ))),
        }
    }

    /// Absolute expiry timestamp via `EXPIRETIME` (requires Redis 7.0+)
    pub async fn key_expire_time(&self, key: &str) -> Result<Option<SystemTime>> {
        let mut conn = self.manager.clone();
        let secs: i64 = redis::cmd("EXPIRETIME")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        match secs {
            -2 | -1 => Ok(None),
            s if s >= 0 => Ok(Some(UNIX_EPOCH + Duration::from_secs(s as u64))),
            other => Err(CacheError::Protocol(format!(
                "unexpected EXPIRETIME reply: {other}"
            ))),
        }
    }

    /// One page of a cursor scan. A returned cursor of 0 ends the iteration.
    pub async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.manager.clone();
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(page)
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Server clock
    pub async fn time(&self) -> Result<SystemTime> {
        let mut conn = self.manager.clone();
        let (secs, micros): (u64, u64) = redis::cmd("TIME").query_async(&mut conn).await?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros))
    }

    pub async fn dbsize(&self) -> Result<u64> {
        let mut conn = self.manager.clone();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    /// Round-trip latency of a PING
    pub async fn ping(&self) -> Result<Duration> {
        let mut conn = self.manager.clone();
        let started = Instant::now();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(started.elapsed())
    }

    pub async fn echo(&self, message: &str) -> Result<String> {
        let mut conn = self.manager.clone();
        let reply: String = redis::cmd("ECHO").arg(message).query_async(&mut conn).await?;
        Ok(reply)
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        let mut conn = self.manager.clone();
        let raw: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut conn)
            .await?;
        let version = raw
            .lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .map(|v| v.trim().to_string())
            .ok_or_else(|| CacheError::Protocol("INFO reply missing redis_version".into()))?;
        Ok(ServerInfo { version })
    }

    pub async fn flush_db(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        debug!("FLUSHDB issued");
        Ok(())
    }

    /// Dedicated connection handle for script invocation
    pub(crate) fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// `SET ... PX` requires a positive argument; clamp sub-millisecond TTLs up
fn px_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
