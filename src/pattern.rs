//! Pattern-based key enumeration and bulk removal
//!
//! Built on the cursor SCAN so the server is never blocked the way `KEYS`
//! would. Patterns use Redis MATCH glob semantics (`*`, `?`, `[set]`).
//! Deletion batches up to `batch_size` keys per `DEL`, giving roughly one
//! round trip per batch instead of one per key.

use std::collections::{HashSet, VecDeque};

use crate::error::Result;
use crate::options::CommandFlags;
use crate::redis_client::RedisClient;

/// Lazy, consume-once sequence of keys matching a glob pattern
///
/// Finite and not restartable. SCAN can report a key twice while the server
/// rehashes; a seen-set filters those so every key is yielded exactly once.
/// Keys written after the scan started may or may not appear.
pub struct KeyScan {
    redis: RedisClient,
    pattern: String,
    page_size: usize,
    cursor: u64,
    buffer: VecDeque<String>,
    seen: HashSet<String>,
    exhausted: bool,
}

impl KeyScan {
    fn new(redis: RedisClient, pattern: String, page_size: usize) -> Self {
        Self {
            redis,
            pattern,
            page_size,
            cursor: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            exhausted: false,
        }
    }

    /// Next matching key, or `None` once the cursor completes
    pub async fn next(&mut self) -> Result<Option<String>> {
        loop {
            while let Some(key) = self.buffer.pop_front() {
                if self.seen.insert(key.clone()) {
                    return Ok(Some(key));
                }
            }
            if self.exhausted {
                return Ok(None);
            }
            let (cursor, keys) = self
                .redis
                .scan_page(self.cursor, &self.pattern, self.page_size)
                .await?;
            self.cursor = cursor;
            if cursor == 0 {
                self.exhausted = true;
            }
            self.buffer.extend(keys);
        }
    }

    /// Drain the remainder of the sequence into memory
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        while let Some(key) = self.next().await? {
            keys.push(key);
        }
        Ok(keys)
    }
}

/// Cursor scan plus batched deletion over scoped-key patterns
#[derive(Clone)]
pub struct PatternEngine {
    redis: RedisClient,
    page_size: usize,
}

impl PatternEngine {
    pub fn new(redis: RedisClient, page_size: usize) -> Self {
        Self { redis, page_size }
    }

    /// Enumerate keys matching an already-scoped pattern
    pub fn scan(&self, scoped_pattern: &str) -> KeyScan {
        KeyScan::new(self.redis.clone(), scoped_pattern.to_string(), self.page_size)
    }

    /// Delete every key matching the scoped pattern in batches of
    /// `batch_size`. Returns the accumulated removed count and the deleted
    /// keys, for the caller to drop locally and broadcast.
    ///
    /// With `fire_and_forget` the per-batch `DEL` is dispatched without
    /// awaiting its reply and the count is the number of keys dispatched,
    /// not a server-confirmed figure.
    pub async fn remove_matching(
        &self,
        scoped_pattern: &str,
        batch_size: usize,
        flags: CommandFlags,
    ) -> Result<(u64, Vec<String>)> {
        let batch_size = batch_size.max(1);
        let mut scan = self.scan(scoped_pattern);
        let mut removed: u64 = 0;
        let mut removed_keys: Vec<String> = Vec::new();
        let mut batch: Vec<String> = Vec::with_capacity(batch_size);

        while let Some(key) = scan.next().await? {
            batch.push(key);
            if batch.len() >= batch_size {
                removed += self.redis.key_delete(&batch, flags).await?;
                removed_keys.append(&mut batch);
            }
        }
        if !batch.is_empty() {
            removed += self.redis.key_delete(&batch, flags).await?;
            removed_keys.append(&mut batch);
        }

        Ok((removed, removed_keys))
    }
}
