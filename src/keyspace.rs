//! Key scoping under the shared instance namespace
//!
//! Every key stored in Redis, held in the local store, or carried on the
//! invalidation channel is the *scoped* form `<namespace>:<user_key>`. Locks
//! live under a dedicated `lock:` prefix so that lock records and cached
//! values never collide.

use crate::error::{CacheError, Result};

/// Prefix for distributed lock records
const LOCK_PREFIX: &str = "lock:";

/// Suffix of the pub/sub channel used for cross-instance invalidation
const INVALIDATE_CHANNEL_SUFFIX: &str = "invalidate";

/// Scopes user keys under the namespace shared by all cooperating instances
#[derive(Debug, Clone)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(CacheError::Validation("namespace must not be empty".into()));
        }
        Ok(Self { namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Validate and trim a caller-supplied key
    pub fn validate<'a>(&self, user_key: &'a str) -> Result<&'a str> {
        let trimmed = user_key.trim();
        if trimmed.is_empty() {
            return Err(CacheError::Validation(
                "cache key must not be empty or whitespace".into(),
            ));
        }
        Ok(trimmed)
    }

    /// `<namespace>:<user_key>`, the only form the system stores or transmits
    pub fn scope(&self, user_key: &str) -> Result<String> {
        let key = self.validate(user_key)?;
        Ok(format!("{}:{}", self.namespace, key))
    }

    /// Strip the namespace prefix; `None` if the key belongs to another namespace
    pub fn unscope<'a>(&self, scoped: &'a str) -> Option<&'a str> {
        scoped
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }

    /// `lock:<namespace>:<user_key>`, the storage key of a distributed lock record
    pub fn lock_key(&self, user_key: &str) -> Result<String> {
        Ok(format!("{}{}", LOCK_PREFIX, self.scope(user_key)?))
    }

    /// Pub/sub channel carrying invalidation messages for this namespace
    pub fn channel(&self) -> String {
        format!("{}:{}", self.namespace, INVALIDATE_CHANNEL_SUFFIX)
    }

    /// Scope a glob pattern. The namespace prefix is escaped so that glob
    /// metacharacters in the namespace itself match literally.
    pub fn scope_pattern(&self, pattern: &str) -> Result<String> {
        let pattern = self.validate(pattern)?;
        Ok(format!("{}:{}", escape_glob(&self.namespace), pattern))
    }
}

/// Escape Redis MATCH metacharacters (`*`, `?`, `[`, `]`, `\`)
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
