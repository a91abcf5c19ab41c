//! Integration tests for pattern enumeration and bulk removal
//!
//! Requires a reachable Redis (`REDIS_URL`); tests skip otherwise.

mod common;

use common::*;
use hybrid_cache::{CommandFlags, EntryOptions};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn keys_yields_exactly_the_matching_set() {
    let ns = test_namespace("scan");
    let Some(cache) = try_connect(&ns).await else {
        return;
    };

    for i in 0..25 {
        cache
            .set(&format!("match:{i}"), &i, &EntryOptions::new())
            .await
            .unwrap();
        cache
            .set(&format!("other:{i}"), &i, &EntryOptions::new())
            .await
            .unwrap();
    }

    let mut scan = cache.keys("match:*").unwrap();
    let mut seen = HashSet::new();
    while let Some(key) = scan.next().await.unwrap() {
        // yielded keys are scoped; each appears exactly once
        assert!(key.starts_with(&format!("{ns}:match:")), "unexpected key {key}");
        assert!(seen.insert(key));
    }
    assert_eq!(seen.len(), 25);

    cache.close();
}

#[tokio::test]
async fn glob_classes_match_redis_semantics() {
    let ns = test_namespace("glob");
    let Some(cache) = try_connect(&ns).await else {
        return;
    };

    for key in ["TestItem#1", "testItem#2", "TastItem#3", "noise"] {
        cache.set(key, &1, &EntryOptions::new()).await.unwrap();
    }

    let keys = cache.keys("[Tt]estItem#?").unwrap().collect().await.unwrap();
    let mut unscoped: Vec<String> = keys
        .iter()
        .map(|k| k.strip_prefix(&format!("{ns}:")).unwrap().to_string())
        .collect();
    unscoped.sort();
    assert_eq!(unscoped, vec!["TestItem#1", "testItem#2"]);

    cache.close();
}

#[tokio::test]
async fn remove_by_pattern_deletes_matches_and_spares_noise() {
    let ns = test_namespace("rmpat");
    let Some(cache) = try_connect(&ns).await else {
        return;
    };

    // 1000 matching keys (both case shapes the pattern accepts) + noise
    let entry = EntryOptions::new().redis_only();
    let mut matching: Vec<(String, u32)> = Vec::new();
    for i in 0..500u32 {
        matching.push((format!("TestRemoveWithPattern#{i}"), i));
        matching.push((format!("testremovewithpattern#{i}"), i));
    }
    cache.set_all(&matching, &entry).await.unwrap();

    let noise: Vec<(String, u32)> = (0..1000).map(|i| (format!("KeepMe#{i}"), i)).collect();
    cache.set_all(&noise, &entry).await.unwrap();

    let removed = cache
        .remove_by_pattern(
            "[Tt]est[Rr]emove[Ww]ith[Pp]attern#*",
            CommandFlags::default(),
            100,
        )
        .await
        .unwrap();
    assert!(removed >= 1000, "removed only {removed}");

    // no matching key survives
    let leftovers = cache
        .keys("[Tt]est[Rr]emove[Ww]ith[Pp]attern#*")
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert!(leftovers.is_empty(), "{} keys survived", leftovers.len());

    // the noise is untouched
    let kept = cache.keys("KeepMe#*").unwrap().collect().await.unwrap();
    assert_eq!(kept.len(), 1000);

    cache.remove_by_pattern("KeepMe#*", CommandFlags::default(), 200)
        .await
        .unwrap();
    cache.close();
}

#[tokio::test]
async fn fire_and_forget_removal_reports_the_dispatched_count() {
    let ns = test_namespace("rmfaf");
    let Some(cache) = try_connect(&ns).await else {
        return;
    };

    let entries: Vec<(String, u32)> = (0..50).map(|i| (format!("burn:{i}"), i)).collect();
    cache
        .set_all(&entries, &EntryOptions::new().redis_only())
        .await
        .unwrap();

    let removed = cache
        .remove_by_pattern("burn:*", CommandFlags::fire_and_forget(), 10)
        .await
        .unwrap();
    // dispatched count, not server-confirmed
    assert_eq!(removed, 50);

    sleep(Duration::from_millis(500)).await;
    let left = cache.keys("burn:*").unwrap().collect().await.unwrap();
    assert!(left.is_empty());

    cache.close();
}

#[tokio::test]
async fn redis_only_removal_skips_the_broadcast() {
    let ns = test_namespace("rmquiet");
    let Some(a) = try_connect(&ns).await else {
        return;
    };
    let Some(b) = try_connect(&ns).await else {
        return;
    };
    sleep(Duration::from_millis(200)).await;

    a.set("quiet:1", &"v", &EntryOptions::new()).await.unwrap();
    let got: Option<String> = b.get("quiet:1").await.unwrap();
    assert_eq!(got.as_deref(), Some("v"));

    let received_before = b.invalidation_stats().unwrap().received;
    a.remove_by_pattern_redis_only("quiet:*", CommandFlags::default(), 100)
        .await
        .unwrap();
    sleep(Duration::from_millis(500)).await;

    // no invalidation was published for the removal
    assert_eq!(b.invalidation_stats().unwrap().received, received_before);
    // the remote keys are gone...
    let left = a.keys("quiet:*").unwrap().collect().await.unwrap();
    assert!(left.is_empty());
    // ...while B's local copy intentionally survives until it expires
    let got: Option<String> = b.get("quiet:1").await.unwrap();
    assert_eq!(got.as_deref(), Some("v"));

    a.close();
    b.close();
}

#[tokio::test]
async fn removal_over_peers_also_clears_their_local_tier() {
    let ns = test_namespace("rmpeer");
    let Some(a) = try_connect(&ns).await else {
        return;
    };
    let Some(b) = try_connect(&ns).await else {
        return;
    };
    sleep(Duration::from_millis(200)).await;

    for i in 0..20 {
        a.set(&format!("sess:{i}"), &"live", &EntryOptions::new())
            .await
            .unwrap();
    }
    sleep(Duration::from_millis(300)).await;
    for i in 0..20 {
        let got: Option<String> = b.get(&format!("sess:{i}")).await.unwrap();
        assert_eq!(got.as_deref(), Some("live"));
    }

    a.remove_by_pattern("sess:*", CommandFlags::default(), 7)
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;

    for i in 0..20 {
        let got: Option<String> = b.get(&format!("sess:{i}")).await.unwrap();
        assert_eq!(got, None, "sess:{i} survived on the peer");
    }

    a.close();
    b.close();
}
