mod common;

use common::CountingDb;
use peer_cache::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn scores_read_through() -> Result<(), Box<dyn std::error::Error>> {
    let db = CountingDb::scores("scores");
    let group = new_group("it-scores", 2 << 10, SharedDb(db.clone()))?;

    for (name, score) in [("Tom", "630"), ("Jack", "589"), ("Sam", "567")] {
        assert_eq!(group.get(name).await?, score);
        assert_eq!(group.get(name).await?, score);
        assert_eq!(db.hits(name), 1, "{name} must be loaded once");
    }

    let err = group.get("Nonexistent").await.unwrap_err();
    assert!(matches!(err, CacheError::Loader { ref key, .. } if key == "Nonexistent"));
    assert!(err.to_string().contains("Nonexistent not exist"));
    assert!(!group.is_cached("Nonexistent"));

    // Failures aren't cached, the next attempt goes to the loader again.
    assert!(group.get("Nonexistent").await.is_err());
    assert_eq!(db.hits("Nonexistent"), 2);

    let stats = group.stats();
    assert_eq!(stats.gets, 8);
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.local_loads, 3);
    assert_eq!(stats.local_load_errs, 2);
    assert_eq!(stats.peer_loads, 0);

    Ok(())
}

#[tokio::test]
async fn registry_finds_groups_by_name() -> Result<(), Box<dyn std::error::Error>> {
    let group = Group::builder("it-registry")
        .shared_loader(CountingDb::scores("registry"))
        .register()?;

    let found = get_group("it-registry").ok_or("group isn't registered")?;
    assert!(Arc::ptr_eq(&group, &found));
    assert!(get_group("it-no-such-group").is_none());

    let unregistered = Group::builder("it-unregistered")
        .shared_loader(CountingDb::scores("unregistered"))
        .build()?;
    assert_eq!(unregistered.get("Sam").await?, "567");
    assert!(get_group("it-unregistered").is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_load_once() -> Result<(), Box<dyn std::error::Error>> {
    let db = CountingDb::with_latency("coalesce", Duration::from_millis(200));
    let group = Group::builder("it-coalesce")
        .max_bytes(2 << 10)
        .shared_loader(db.clone())
        .build()?;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let group = group.clone();
        handles.push(tokio::spawn(async move { group.get("Tom").await }));
    }
    for handle in handles {
        assert_eq!(handle.await??, "630");
    }

    assert_eq!(db.hits("Tom"), 1);
    assert_eq!(group.stats().local_loads, 1);
    assert_eq!(group.stats().loads_deduped, 1);
    assert!(group.is_cached("Tom"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_are_shared() -> Result<(), Box<dyn std::error::Error>> {
    let db = CountingDb::with_latency("coalesce-err", Duration::from_millis(200));
    let group = Group::builder("it-coalesce-err").shared_loader(db.clone()).build()?;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let group = group.clone();
        handles.push(tokio::spawn(async move { group.get("Nobody").await }));
    }
    for handle in handles {
        assert!(matches!(handle.await?, Err(CacheError::Loader { .. })));
    }
    assert_eq!(db.hits("Nobody"), 1);

    Ok(())
}

#[tokio::test]
async fn cache_stays_within_budget() -> Result<(), Box<dyn std::error::Error>> {
    let db = CountingDb::scores("budget");
    // "key-N" + "budget:key-N" is at least 17 bytes; three of them don't fit.
    let group = Group::builder("it-budget").max_bytes(40).shared_loader(db.clone()).build()?;

    for i in 0..10 {
        group.get(&format!("key-{i}")).await?;
        assert!(group.cache_bytes() <= 40);
    }
    assert_eq!(group.cache_len(), 2);
    assert_eq!(group.evictions(), 8);
    assert!(group.is_cached("key-9"));
    assert!(!group.is_cached("key-0"));

    // An evicted key is loaded again.
    group.get("key-0").await?;
    assert_eq!(db.hits("key-0"), 2);

    Ok(())
}

// Wraps a shared database so that it can be passed by value.
struct SharedDb(Arc<CountingDb>);

#[async_trait::async_trait]
impl Loader for SharedDb {
    async fn load(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        self.0.load(key).await
    }
}
