//! Error types for the hybrid cache

use thiserror::Error;

/// Main error type for all cache operations
///
/// Transport errors are subject to the `throw_on_distributed_error` option:
/// the orchestrator either surfaces them or swallows them with a log and
/// falls back to the local tier. Every other variant is always surfaced.
///
/// A lock token mismatch is *not* an error; `try_extend` and `try_release`
/// report it as `Ok(false)`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid caller input (empty key, empty key list, empty entry set)
    #[error("validation error: {0}")]
    Validation(String),

    /// Redis transport failure (connect, command, publish)
    #[error("redis transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// Unexpected reply shape from the server; indicates a bug, never swallowed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Admin command issued while `allow_admin` is disabled
    #[error("admin commands are disabled: {0}")]
    AdminDisabled(&'static str),

    /// The remote tier is unavailable and the instance is running local-only
    #[error("redis tier unavailable (running in degraded local-only mode)")]
    Disconnected,

    /// A blocking-facade operation exceeded `sync_timeout`
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Failure raised by caller-supplied code (e.g. a `get_or_create` producer)
    #[error("{0}")]
    Other(String),
}

impl CacheError {
    /// Wrap an arbitrary error from caller-supplied code
    pub fn other(err: impl std::fmt::Display) -> Self {
        Self::Other(err.to_string())
    }

    /// True for errors governed by `throw_on_distributed_error`
    pub(crate) fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Disconnected | Self::Timeout(_))
    }
}

/// Convenience alias used across the crate
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
