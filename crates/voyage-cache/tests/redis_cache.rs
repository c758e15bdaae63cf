//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up a Redis instance and therefore need
//! Docker: run with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use voyage_cache::cache::{RedisStore, RemoteStore, RemoteWrite, create_redis_pool};
use voyage_cache::config::RemoteConfig;
use voyage_cache::{CacheConfig, CacheService, build_key, namespaces};

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn remote_config() -> RemoteConfig {
    RemoteConfig {
        enabled: true,
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 2000,
    }
}

async fn redis_service(channel: &str) -> CacheService {
    let mut config = CacheConfig::default();
    config.remote = remote_config().await;
    config.health.probe_timeout_ms = 2000;
    config.invalidation.channel = channel.to_string();
    CacheService::builder(config).start().await.expect("service starts")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_store_commands() {
    let pool = create_redis_pool(&remote_config().await).unwrap();
    let store = RedisStore::new(pool);

    store.ping().await.unwrap();

    store
        .set("it:store:a", Arc::new(b"alpha".to_vec()), Duration::from_secs(60))
        .await
        .unwrap();
    let entry = store.get("it:store:a").await.unwrap().expect("present");
    assert_eq!(entry.value.as_slice(), b"alpha");
    let ttl = entry.ttl.expect("has ttl");
    assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(50));

    let results = store
        .mset(&[
            RemoteWrite {
                key: "it:store:b".into(),
                value: Arc::new(b"beta".to_vec()),
                ttl: Duration::from_secs(60),
            },
            RemoteWrite {
                key: "it:store:c".into(),
                value: Arc::new(b"gamma".to_vec()),
                ttl: Duration::from_secs(60),
            },
        ])
        .await
        .unwrap();
    assert!(results.iter().all(Result::is_ok));

    let found = store
        .mget(&[
            "it:store:a".to_string(),
            "it:store:missing".to_string(),
            "it:store:c".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found["it:store:c"].value.as_slice(), b"gamma");

    store.delete("it:store:a").await.unwrap();
    store.delete("it:store:a").await.unwrap();
    assert!(store.get("it:store:a").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_ttl_expiry() {
    let pool = create_redis_pool(&remote_config().await).unwrap();
    let store = RedisStore::new(pool);

    store
        .set("it:ttl", Arc::new(b"v".to_vec()), Duration::from_millis(300))
        .await
        .unwrap();
    assert!(store.get("it:ttl").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.get("it:ttl").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_service_round_trip_and_invalidation() {
    let a = redis_service("it:invalidate:roundtrip").await;
    let b = redis_service("it:invalidate:roundtrip").await;
    assert!(a.health_check().await.remote_reachable);

    // Let both pub/sub subscriptions come up.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let key = build_key(namespaces::PRODUCT, "redis-1", None).unwrap();
    a.orchestrator().set(&key, b"v1".to_vec(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let value = b.orchestrator().get(&key).await.expect("shared via redis");
    assert_eq!(value.as_slice(), b"v1");
    assert!(b.orchestrator().memory().contains(key.as_str()));

    a.orchestrator().set(&key, b"v2".to_vec(), None).await.unwrap();

    let mut evicted = false;
    for _ in 0..100 {
        if !b.orchestrator().memory().contains(key.as_str()) {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(evicted, "peer memory copy was not invalidated");
    assert_eq!(b.orchestrator().get(&key).await.unwrap().as_slice(), b"v2");

    a.cleanup().await;
    b.cleanup().await;
}
