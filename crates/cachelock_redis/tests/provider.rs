// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tests against a live server. Run with `--ignored` and `REDIS_URL` pointing at a disposable
//! instance.

use std::time::Duration;

use cachelock_provider::{Error, Key, Provider, Sentinel, SentinelType};
use cachelock_redis::{RedisProvider, RedisProviderConfig};

const TTL: Duration = Duration::from_secs(60);

async fn provider(namespace: &str) -> RedisProvider {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());
    let provider = RedisProvider::connect(RedisProviderConfig::new(url).with_key_prefix(format!("cachelock-test-{namespace}")))
        .await
        .expect("redis reachable");
    provider.flush("", true).await.expect("flush");
    provider
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn lock_store_and_read_back() {
    let provider = provider("store").await;
    let key = Key::from("OBJ_1");

    let miss = provider.get_value(&key, true).await.expect("get");
    assert!(!miss.sentinel.is_no_lock());

    let update = provider.write_sentinel(SentinelType::Update, &[key.clone()]).await.expect("lock");
    let stale = provider
        .set_value(&key, &[key.clone()], "old", &miss.sentinel, TTL)
        .await
        .expect("set");
    assert!(stale.conflict);

    let stored = provider.set_value(&key, &[key.clone()], "new", &update, TTL).await.expect("set");
    assert!(stored.stored);
    assert_eq!(provider.get_value(&key, false).await.expect("get").value.as_deref(), Some("new"));
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn write_sentinel_is_all_or_nothing() {
    let provider = provider("claim").await;
    let held = provider.write_sentinel(SentinelType::Delete, &[Key::from("b")]).await.expect("lock");
    assert!(!held.is_no_lock());

    let blocked = provider
        .write_sentinel(SentinelType::Create, &[Key::from("a"), Key::from("b")])
        .await
        .expect("lock");
    assert!(blocked.is_no_lock());
    assert!(provider.get_value(&Key::from("a"), false).await.expect("get").conflict.is_none());

    provider.release_sentinel(&[Key::from("b")], &held).await;
    let granted = provider
        .write_sentinel(SentinelType::Create, &[Key::from("a"), Key::from("b")])
        .await
        .expect("lock");
    assert!(!granted.is_no_lock());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn cleared_dependencies_leave_tombstones() {
    let provider = provider("deps").await;
    let deps = Key::from("DEPS_1");
    provider.add_dependency(&[deps.clone()], &[Key::from("coll")], TTL).await.expect("add");
    provider.clear_dependencies(&deps, true).await.expect("clear");

    let lookup = provider.get_value(&Key::from("coll"), true).await.expect("get");
    assert_eq!(lookup.conflict.as_deref(), Some(Sentinel::TOMBSTONE.as_str()));

    let err = provider
        .add_dependency(&[deps.clone()], &[Key::from("other")], TTL)
        .await
        .expect_err("tombstoned");
    assert!(matches!(err, Error::Tombstoned(_)));

    provider.flush("", false).await.expect("flush");
    assert!(provider.get_value(&deps, false).await.expect("get").conflict.is_some());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn invalidation_handlers_are_unsupported() {
    let provider = provider("handlers").await;
    let err = provider
        .register_invalidation_handler(std::sync::Arc::new(|_: &Key| {}), &Key::from("k"))
        .await
        .expect_err("unsupported");
    assert!(matches!(err, Error::Unsupported(_)));
}
