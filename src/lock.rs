//! Token-owned distributed locks
//!
//! A lock is a Redis record at `lock:<namespace>:<key>` whose value is the
//! caller's opaque token. Acquisition is an atomic set-if-absent with TTL;
//! extend and release are server-side scripts that only act when the stored
//! value still equals the presented token, so a lock that expired and was
//! re-acquired by another owner cannot be released out from under them.
//!
//! Ordinary cache writes perform no lock-aware guarding: the `lock:` prefix
//! keeps lock records out of the value keyspace, and a caller who writes a
//! cache key literally named `lock:...` overwrites the record. That is
//! deliberate policy, not an accident.

use rand::Rng;
use redis::Script;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::keyspace::Keyspace;
use crate::options::{CommandFlags, SetCondition};
use crate::redis_client::RedisClient;

/// First retry delay inside `lock_key`
const BACKOFF_BASE: Duration = Duration::from_millis(10);
/// Retry delay ceiling
const BACKOFF_CAP: Duration = Duration::from_millis(500);

const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Acquire/extend/release of token-owned locks
#[derive(Clone)]
pub struct LockManager {
    redis: RedisClient,
    keyspace: Keyspace,
    extend: Arc<Script>,
    release: Arc<Script>,
}

impl LockManager {
    pub fn new(redis: RedisClient, keyspace: Keyspace) -> Self {
        Self {
            redis,
            keyspace,
            extend: Arc::new(Script::new(EXTEND_SCRIPT)),
            release: Arc::new(Script::new(RELEASE_SCRIPT)),
        }
    }

    /// Atomic set-if-absent with TTL; `Ok(true)` iff the lock was created
    pub async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let lock_key = self.keyspace.lock_key(key)?;
        self.redis
            .string_set(
                &lock_key,
                token.as_bytes(),
                Some(ttl),
                SetCondition::IfNotExists,
                false,
                CommandFlags::default(),
            )
            .await
    }

    /// Reset the TTL iff the stored token matches; `Ok(false)` on mismatch
    /// or on a lock that no longer exists
    pub async fn try_extend(&self, key: &str, token: &str, new_ttl: Duration) -> Result<bool> {
        let lock_key = self.keyspace.lock_key(key)?;
        let mut conn = self.redis.connection();
        let applied: i64 = self
            .extend
            .key(&lock_key)
            .arg(token)
            .arg(ttl_millis(new_ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    /// Compare-and-delete; `Ok(false)` on token mismatch or missing lock
    pub async fn try_release(&self, key: &str, token: &str) -> Result<bool> {
        let lock_key = self.keyspace.lock_key(key)?;
        let mut conn = self.redis.connection();
        let deleted: i64 = self
            .release
            .key(&lock_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    /// Block cooperatively until the lock is acquired, then return a guard
    /// owning an internally generated token.
    ///
    /// Backoff is exponential with jitter, capped at 500 ms; cancellation is
    /// honored at every backoff boundary (drop the future to stop waiting).
    /// Callers needing a deadline wrap this in `tokio::time::timeout`.
    pub async fn lock_key(&self, key: &str, ttl: Duration) -> Result<LockGuard> {
        let token = Uuid::new_v4().simple().to_string();
        let mut delay = BACKOFF_BASE;
        loop {
            if self.try_lock(key, &token, ttl).await? {
                debug!(key = %key, "lock acquired");
                return Ok(LockGuard {
                    manager: self.clone(),
                    key: key.to_string(),
                    token,
                    released: false,
                });
            }
            let jitter_ms =
                rand::thread_rng().gen_range(0..=(delay.as_millis() as u64 / 4).max(1));
            tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
            delay = next_backoff(delay);
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(BACKOFF_CAP)
}

/// `PEXPIRE` requires a positive argument
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Scoped acquisition handle returned by [`LockManager::lock_key`]
///
/// Release explicitly with [`release`](LockGuard::release) to observe the
/// outcome. A guard dropped without releasing spawns a best-effort release
/// so abandoned locks do not linger for their full TTL.
pub struct LockGuard {
    manager: LockManager,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ownership token backing this guard
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Reset the lock's TTL; `Ok(false)` when the lock already expired and
    /// was taken by someone else
    pub async fn extend(&self, new_ttl: Duration) -> Result<bool> {
        self.manager.try_extend(&self.key, &self.token, new_ttl).await
    }

    /// Release the lock; `Ok(false)` when it had already expired
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.manager.try_release(&self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = self.manager.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                let _ = manager.try_release(&key, &token).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut delay = BACKOFF_BASE;
        let mut seen = vec![delay];
        for _ in 0..8 {
            delay = next_backoff(delay);
            seen.push(delay);
        }
        assert_eq!(seen[0], Duration::from_millis(10));
        assert_eq!(seen[1], Duration::from_millis(20));
        assert_eq!(seen[2], Duration::from_millis(40));
        assert!(seen.iter().all(|d| *d <= BACKOFF_CAP));
        assert_eq!(*seen.last().unwrap(), BACKOFF_CAP);
    }

    #[test]
    fn pexpire_argument_is_positive() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(3)), 3000);
    }

    #[test]
    fn scripts_guard_on_token_equality() {
        // the compare half of compare-and-set/-delete must be present
        assert!(EXTEND_SCRIPT.contains("GET") && EXTEND_SCRIPT.contains("PEXPIRE"));
        assert!(RELEASE_SCRIPT.contains("GET") && RELEASE_SCRIPT.contains("DEL"));
    }
}
