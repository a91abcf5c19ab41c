//! Configuration: instance-wide options and per-call entry options

use std::time::{Duration, SystemTime};

use crate::error::{CacheError, Result};

/// Instance-wide configuration, read-only after construction
///
/// # Example
///
/// ```rust,no_run
/// use hybrid_cache::HybridCacheOptions;
/// use std::time::Duration;
///
/// let options = HybridCacheOptions::new("app", "redis://127.0.0.1:6379")
///     .default_expiration(Duration::from_secs(600))
///     .throw_on_distributed_error(true);
/// ```
#[derive(Debug, Clone)]
pub struct HybridCacheOptions {
    /// Namespace shared by all cooperating instances; prefixes every key and
    /// the invalidation channel
    pub namespace: String,
    /// Redis connection string
    pub redis_url: String,
    /// Surface remote-tier errors instead of swallowing them with a log
    pub throw_on_distributed_error: bool,
    /// Fail construction when the initial connect fails; when `false` the
    /// instance degrades to local-only operation
    pub abort_on_connect_fail: bool,
    /// Initial-connect attempts. `connect_retry * connection_timeout` is a
    /// lower bound on the give-up time; transport backoff may exceed it.
    pub connect_retry: usize,
    /// Per-attempt connection timeout
    pub connection_timeout: Duration,
    /// Per-command timeout for synchronous (blocking facade) calls
    pub sync_timeout: Duration,
    /// Per-command timeout for awaitable calls
    pub async_timeout: Duration,
    /// Cadence of the background keepalive PING; `None` disables it
    pub keep_alive: Option<Duration>,
    /// Enable admin commands (`clear_all`, `database_size`)
    pub allow_admin: bool,
    /// Drop the entire local store when the invalidation subscription is
    /// re-established after a transport failure
    pub flush_local_on_bus_reconnect: bool,
    /// Publish retry cap for the invalidation bus
    pub bus_retry_count: u32,
    /// Base delay of the bus's linear publish backoff (`delay = base * attempt`)
    pub bus_retry_base_delay: Duration,
    /// Fallback TTL applied when a call supplies no expiry
    pub default_expiration: Duration,
    /// SCAN page size for pattern enumeration
    pub scan_page_size: usize,
    /// Maximum number of keys carried by a single invalidation message;
    /// larger removals are split across messages
    pub invalidation_batch_size: usize,
    /// Local store entry bound
    pub local_capacity: u64,
    /// Emit per-operation debug logs
    pub enable_logging: bool,
    /// Emit trace-level logs on the hot path
    pub enable_tracing: bool,
}

impl HybridCacheOptions {
    pub fn new(namespace: impl Into<String>, redis_url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            redis_url: redis_url.into(),
            throw_on_distributed_error: false,
            abort_on_connect_fail: true,
            connect_retry: 3,
            connection_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(5),
            async_timeout: Duration::from_secs(5),
            keep_alive: Some(Duration::from_secs(60)),
            allow_admin: false,
            flush_local_on_bus_reconnect: true,
            bus_retry_count: 3,
            bus_retry_base_delay: Duration::from_millis(50),
            default_expiration: Duration::from_secs(300),
            scan_page_size: 1000,
            invalidation_batch_size: 512,
            local_capacity: 10_000,
            enable_logging: true,
            enable_tracing: false,
        }
    }

    pub fn throw_on_distributed_error(mut self, v: bool) -> Self {
        self.throw_on_distributed_error = v;
        self
    }

    pub fn abort_on_connect_fail(mut self, v: bool) -> Self {
        self.abort_on_connect_fail = v;
        self
    }

    pub fn connect_retry(mut self, attempts: usize) -> Self {
        self.connect_retry = attempts;
        self
    }

    pub fn connection_timeout(mut self, t: Duration) -> Self {
        self.connection_timeout = t;
        self
    }

    pub fn command_timeouts(mut self, sync: Duration, async_: Duration) -> Self {
        self.sync_timeout = sync;
        self.async_timeout = async_;
        self
    }

    pub fn keep_alive(mut self, cadence: Option<Duration>) -> Self {
        self.keep_alive = cadence;
        self
    }

    pub fn allow_admin(mut self, v: bool) -> Self {
        self.allow_admin = v;
        self
    }

    pub fn flush_local_on_bus_reconnect(mut self, v: bool) -> Self {
        self.flush_local_on_bus_reconnect = v;
        self
    }

    pub fn bus_retry(mut self, count: u32, base_delay: Duration) -> Self {
        self.bus_retry_count = count;
        self.bus_retry_base_delay = base_delay;
        self
    }

    pub fn default_expiration(mut self, ttl: Duration) -> Self {
        self.default_expiration = ttl;
        self
    }

    pub fn scan_page_size(mut self, n: usize) -> Self {
        self.scan_page_size = n;
        self
    }

    pub fn local_capacity(mut self, n: u64) -> Self {
        self.local_capacity = n;
        self
    }

    pub fn enable_logging(mut self, v: bool) -> Self {
        self.enable_logging = v;
        self
    }

    pub fn enable_tracing(mut self, v: bool) -> Self {
        self.enable_tracing = v;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(CacheError::Validation("namespace must not be empty".into()));
        }
        if self.redis_url.trim().is_empty() {
            return Err(CacheError::Validation("redis_url must not be empty".into()));
        }
        if self.default_expiration.is_zero() {
            return Err(CacheError::Validation(
                "default_expiration must be positive".into(),
            ));
        }
        if self.scan_page_size == 0 || self.invalidation_batch_size == 0 {
            return Err(CacheError::Validation(
                "scan_page_size and invalidation_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Condition governing whether a `set` takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Unconditional write
    #[default]
    Always,
    /// Write only when the key does not exist (`NX`)
    IfNotExists,
    /// Write only when the key already exists (`XX`)
    IfExists,
}

/// Routing and dispatch hints attached to a command
///
/// `prefer_replica` and `demand_master` are honored where the deployment can
/// route them (cluster/replica topologies); against a single node they are
/// carried but have no effect. `fire_and_forget` always applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    pub prefer_replica: bool,
    pub demand_master: bool,
    /// Dispatch without awaiting the acknowledgement
    pub fire_and_forget: bool,
}

impl CommandFlags {
    pub fn fire_and_forget() -> Self {
        Self {
            fire_and_forget: true,
            ..Self::default()
        }
    }
}

/// Per-call write options (read path uses the instance defaults)
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// TTL of the local copy; clamped by the remote TTL on read-through
    pub local_expiry: Option<Duration>,
    /// TTL of the Redis key
    pub redis_expiry: Option<Duration>,
    /// Skip the local tier when `false`
    pub local_cache_enable: Option<bool>,
    /// Skip the Redis tier when `false`
    pub redis_cache_enable: Option<bool>,
    /// Preserve the existing remote TTL instead of resetting it (`KEEPTTL`)
    pub keep_ttl: bool,
    pub when: SetCondition,
    pub flags: CommandFlags,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_expiry(mut self, ttl: Duration) -> Self {
        self.local_expiry = Some(ttl);
        self
    }

    pub fn redis_expiry(mut self, ttl: Duration) -> Self {
        self.redis_expiry = Some(ttl);
        self
    }

    /// Set the remote expiry from an absolute UTC instant; instants in the
    /// past collapse to an immediate expiry
    pub fn redis_expiry_at(mut self, at: SystemTime) -> Self {
        self.redis_expiry = Some(
            at.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
        );
        self
    }

    pub fn local_only(mut self) -> Self {
        self.redis_cache_enable = Some(false);
        self
    }

    pub fn redis_only(mut self) -> Self {
        self.local_cache_enable = Some(false);
        self
    }

    pub fn keep_ttl(mut self, v: bool) -> Self {
        self.keep_ttl = v;
        self
    }

    pub fn when(mut self, condition: SetCondition) -> Self {
        self.when = condition;
        self
    }

    pub fn flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn fire_and_forget(mut self) -> Self {
        self.flags.fire_and_forget = true;
        self
    }

    pub(crate) fn local_enabled(&self) -> bool {
        self.local_cache_enable.unwrap_or(true)
    }

    pub(crate) fn redis_enabled(&self) -> bool {
        self.redis_cache_enable.unwrap_or(true)
    }
}
