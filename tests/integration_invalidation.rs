//! Integration tests for cross-instance coherency over the invalidation bus
//!
//! Requires a reachable Redis (`REDIS_URL`); tests skip otherwise.

mod common;

use common::*;
use hybrid_cache::EntryOptions;
use std::time::Duration;
use tokio::time::sleep;

/// A peer's write must evict this instance's stale local copy.
#[tokio::test]
async fn peer_write_invalidates_local_copy() {
    let ns = test_namespace("xinst");
    let Some(a) = try_connect(&ns).await else {
        return;
    };
    let Some(b) = try_connect(&ns).await else {
        return;
    };
    // both subscribers need to be attached before traffic flows
    sleep(Duration::from_millis(200)).await;

    a.set("x", &"v1", &EntryOptions::new()).await.unwrap();
    let got: Option<String> = b.get("x").await.unwrap();
    assert_eq!(got.as_deref(), Some("v1"));

    b.set("x", &"v2", &EntryOptions::new()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    // A's local copy of v1 was dropped by B's broadcast; the read falls
    // through to Redis and observes v2
    let got: Option<String> = a.get("x").await.unwrap();
    assert_eq!(got.as_deref(), Some("v2"));

    a.close();
    b.close();
}

/// A peer's remove must evict everywhere.
#[tokio::test]
async fn peer_remove_invalidates_local_copy() {
    let ns = test_namespace("xremove");
    let Some(a) = try_connect(&ns).await else {
        return;
    };
    let Some(b) = try_connect(&ns).await else {
        return;
    };
    sleep(Duration::from_millis(200)).await;

    a.set("gone", &"v", &EntryOptions::new()).await.unwrap();
    let got: Option<String> = b.get("gone").await.unwrap();
    assert_eq!(got.as_deref(), Some("v"));

    a.remove(&["gone"]).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let got: Option<String> = b.get("gone").await.unwrap();
    assert_eq!(got, None);

    a.close();
    b.close();
}

/// The writer's own broadcast must not evict its own fresh copy.
#[tokio::test]
async fn self_loopback_is_suppressed() {
    let ns = test_namespace("loopback");
    let Some(cache) = try_connect(&ns).await else {
        return;
    };
    sleep(Duration::from_millis(200)).await;

    cache.set("mine", &"fresh", &EntryOptions::new()).await.unwrap();
    sleep(Duration::from_millis(500)).await;

    // the message came back around and was dropped on origin match
    let stats = cache.invalidation_stats().unwrap();
    assert!(stats.received >= 1);
    assert!(stats.dropped_self >= 1);

    // the local copy survived: this read is a local hit, not a read-through
    let before = cache.stats().remote_hits;
    let got: Option<String> = cache.get("mine").await.unwrap();
    assert_eq!(got.as_deref(), Some("fresh"));
    assert_eq!(cache.stats().remote_hits, before);

    cache.close();
}

/// Instances under different namespaces never observe each other.
#[tokio::test]
async fn namespaces_are_isolated() {
    let ns1 = test_namespace("iso1");
    let ns2 = test_namespace("iso2");
    let Some(one) = try_connect(&ns1).await else {
        return;
    };
    let Some(two) = try_connect(&ns2).await else {
        return;
    };
    sleep(Duration::from_millis(200)).await;

    one.set("shared-name", &"from-one", &EntryOptions::new())
        .await
        .unwrap();
    two.set("shared-name", &"from-two", &EntryOptions::new())
        .await
        .unwrap();
    sleep(Duration::from_millis(500)).await;

    // same user key, different scoped keys: both values intact
    let got: Option<String> = one.get("shared-name").await.unwrap();
    assert_eq!(got.as_deref(), Some("from-one"));
    let got: Option<String> = two.get("shared-name").await.unwrap();
    assert_eq!(got.as_deref(), Some("from-two"));

    // and neither bus heard the other: nothing beyond self-loopbacks
    let stats = two.invalidation_stats().unwrap();
    assert_eq!(stats.received, stats.dropped_self);

    // a remove in one namespace leaves the other untouched
    one.remove(&["shared-name"]).await.unwrap();
    sleep(Duration::from_millis(500)).await;
    let got: Option<String> = two.get("shared-name").await.unwrap();
    assert_eq!(got.as_deref(), Some("from-two"));

    one.close();
    two.close();
}

/// Consolidated invalidation from `set_all` evicts every written key on peers.
#[tokio::test]
async fn set_all_invalidates_peers_in_one_message() {
    let ns = test_namespace("bulkinv");
    let Some(a) = try_connect(&ns).await else {
        return;
    };
    let Some(b) = try_connect(&ns).await else {
        return;
    };
    sleep(Duration::from_millis(200)).await;

    // warm B's local tier with stale values
    let stale: Vec<(String, String)> = (0..10).map(|i| (format!("bulk:{i}"), "old".into())).collect();
    a.set_all(&stale, &EntryOptions::new()).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    for i in 0..10 {
        let got: Option<String> = b.get(&format!("bulk:{i}")).await.unwrap();
        assert_eq!(got.as_deref(), Some("old"));
    }

    let fresh: Vec<(String, String)> = (0..10).map(|i| (format!("bulk:{i}"), "new".into())).collect();
    a.set_all(&fresh, &EntryOptions::new()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    for i in 0..10 {
        let got: Option<String> = b.get(&format!("bulk:{i}")).await.unwrap();
        assert_eq!(got.as_deref(), Some("new"), "key bulk:{i} still stale on peer");
    }

    a.close();
    b.close();
}
