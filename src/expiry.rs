//! Effective local TTL computation
//!
//! After a read-through from Redis, the entry populated into the local store
//! must never outlive the remote key. The resolver clamps the configured
//! local expiry by the remote key's remaining TTL.

use std::time::Duration;

/// Compute the local TTL for an entry just read from Redis.
///
/// `remote_remaining` is the remote key's remaining TTL (`None` when the key
/// has no expiration). The base local lifetime is `configured_local` when
/// given, otherwise `default_ttl`; the result is clamped to the remote
/// remaining TTL when one exists.
pub fn resolve_local_ttl(
    configured_local: Option<Duration>,
    remote_remaining: Option<Duration>,
    default_ttl: Duration,
) -> Duration {
    let base = configured_local.unwrap_or(default_ttl);
    match remote_remaining {
        Some(remote) => base.min(remote),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(300);

    #[test]
    fn clamped_by_remote_remaining() {
        let ttl = resolve_local_ttl(
            Some(Duration::from_secs(3600)),
            Some(Duration::from_secs(3)),
            DEFAULT,
        );
        assert_eq!(ttl, Duration::from_secs(3));
    }

    #[test]
    fn configured_wins_when_shorter_than_remote() {
        let ttl = resolve_local_ttl(
            Some(Duration::from_secs(10)),
            Some(Duration::from_secs(600)),
            DEFAULT,
        );
        assert_eq!(ttl, Duration::from_secs(10));
    }

    #[test]
    fn no_remote_expiry_uses_configured() {
        let ttl = resolve_local_ttl(Some(Duration::from_secs(42)), None, DEFAULT);
        assert_eq!(ttl, Duration::from_secs(42));
    }

    #[test]
    fn falls_back_to_default_then_clamps() {
        assert_eq!(resolve_local_ttl(None, None, DEFAULT), DEFAULT);
        assert_eq!(
            resolve_local_ttl(None, Some(Duration::from_secs(5)), DEFAULT),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn expired_remote_yields_zero() {
        // a remote key observed at 0 remaining must not linger locally
        let ttl = resolve_local_ttl(Some(Duration::from_secs(60)), Some(Duration::ZERO), DEFAULT);
        assert_eq!(ttl, Duration::ZERO);
    }

    #[test]
    fn never_outlives_remote() {
        for base in [1u64, 10, 100, 10_000] {
            for remote in [0u64, 1, 50, 99_999] {
                let ttl = resolve_local_ttl(
                    Some(Duration::from_secs(base)),
                    Some(Duration::from_secs(remote)),
                    DEFAULT,
                );
                assert!(ttl <= Duration::from_secs(remote));
            }
        }
    }
}
