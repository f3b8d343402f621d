//! Integration Tests for the Redis Client
//!
//! Need a reachable Redis or Valkey server; run with
//! `STASH_REMOTE_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
//! Every test works under its own key prefix and never flushes the database.

use std::time::Duration;

use stash::driver::remote::{KvClient, RedisClient, RemoteDriver};
use stash::{CacheItem, Context, Driver, Expiry, Stash};

// == Helper Functions ==

fn remote_url() -> String {
    std::env::var("STASH_REMOTE_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn test_prefix(name: &str) -> String {
    format!("stash-test:{}:{}:", std::process::id(), name)
}

async fn client() -> RedisClient {
    RedisClient::connect(&remote_url()).await.unwrap()
}

// == Client Primitives ==

#[tokio::test]
#[ignore = "requires a Redis server at STASH_REMOTE_URL"]
async fn test_redis_get_reports_ttl() {
    let client = client().await;
    let prefix = test_prefix("ttl");
    let with_ttl = format!("{prefix}a");
    let without_ttl = format!("{prefix}b");

    client.ping().await.unwrap();
    client.set(&with_ttl, b"v", Some(60)).await.unwrap();
    client.set(&without_ttl, b"w", None).await.unwrap();

    let entry = client.get(&with_ttl).await.unwrap().unwrap();
    assert_eq!(entry.value, b"v");
    let ttl = entry.ttl.unwrap();
    assert!(ttl > Duration::from_secs(55) && ttl <= Duration::from_secs(60));

    let entry = client.get(&without_ttl).await.unwrap().unwrap();
    assert_eq!(entry.value, b"w");
    assert!(entry.ttl.is_none());

    assert!(client.get(&format!("{prefix}absent")).await.unwrap().is_none());
    client.flush_prefix(&prefix).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Redis server at STASH_REMOTE_URL"]
async fn test_redis_set_if_absent_script() {
    let client = client().await;
    let prefix = test_prefix("add");
    let key = format!("{prefix}k");

    assert!(client.set_if_absent(&key, b"first", Some(60)).await.unwrap());
    assert!(!client.set_if_absent(&key, b"second", Some(60)).await.unwrap());

    let entry = client.get(&key).await.unwrap().unwrap();
    assert_eq!(entry.value, b"first");
    assert!(entry.ttl.is_some());

    let forever = format!("{prefix}forever");
    assert!(client.set_if_absent(&forever, b"x", None).await.unwrap());
    assert!(client.get(&forever).await.unwrap().unwrap().ttl.is_none());

    assert!(client.del(&key).await.unwrap());
    assert!(!client.del(&key).await.unwrap());
    client.flush_prefix(&prefix).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Redis server at STASH_REMOTE_URL"]
async fn test_redis_flush_prefix_is_literal() {
    let client = client().await;
    let prefix = test_prefix("flush[*]");
    let neighbour = test_prefix("flushX");

    for i in 0..20 {
        client
            .set(&format!("{prefix}{i}"), b"v", Some(60))
            .await
            .unwrap();
    }
    client.set(&format!("{neighbour}k"), b"keep", Some(60)).await.unwrap();

    assert_eq!(client.flush_prefix(&prefix).await.unwrap(), 20);
    assert!(client.get(&format!("{prefix}0")).await.unwrap().is_none());
    assert!(client.get(&format!("{neighbour}k")).await.unwrap().is_some());

    client.flush_prefix(&neighbour).await.unwrap();
}

// == Driver and Facade ==

#[tokio::test]
#[ignore = "requires a Redis server at STASH_REMOTE_URL"]
async fn test_redis_driver_round_trip() {
    let ctx = Context::background();
    let driver = RemoteDriver::new(client().await).with_prefix(test_prefix("driver"));

    driver.init().await.unwrap();
    driver
        .put(&ctx, CacheItem::with_ttl("k", b"v".to_vec(), Duration::from_secs(60)))
        .await
        .unwrap();
    driver
        .forever(&ctx, CacheItem::forever("pinned", b"p".to_vec()))
        .await
        .unwrap();

    let item = driver.get(&ctx, "k").await.unwrap().unwrap();
    assert_eq!(item.value, b"v");
    assert!(matches!(item.expires_at, Expiry::At(_)));
    let pinned = driver.get(&ctx, "pinned").await.unwrap().unwrap();
    assert_eq!(pinned.expires_at, Expiry::Never);

    driver.flush(&ctx).await.unwrap();
    assert!(driver.get(&ctx, "k").await.unwrap().is_none());
    assert!(driver.get(&ctx, "pinned").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Redis server at STASH_REMOTE_URL"]
async fn test_redis_stash_add_and_pull() {
    let ctx = Context::background();
    let driver = RemoteDriver::new(client().await).with_prefix(test_prefix("facade"));
    let stash = Stash::new(driver).await.unwrap();

    assert!(stash
        .add(&ctx, "k", &"v1".to_string(), Duration::from_secs(60))
        .await
        .unwrap());
    assert!(!stash
        .add(&ctx, "k", &"v2".to_string(), Duration::from_secs(60))
        .await
        .unwrap());

    let pulled = stash.pull::<String>(&ctx, "k").await.unwrap();
    assert_eq!(pulled.value, "v1");
    assert!(pulled.is_forgotten());
    assert!(stash.missing(&ctx, "k").await);

    stash.flush(&ctx).await.unwrap();
}
