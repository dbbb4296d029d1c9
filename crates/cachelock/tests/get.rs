// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The read path: hits, misses, self-healing and the is-modified marker.

mod common;

use cachelock::{
    CacheContext, Key, Manager, Provider, SentinelType, SingleItem, get_item_from_cache, get_item_from_cache_with_modified_key,
    get_items_array_from_cache, get_items_from_cache, release_item_lock, save_item_to_cache, save_items_to_collection, take_item_lock,
};
use cachelock_memory::InMemoryProvider;
use cachelock_provider::testing::{MockProvider, ProviderOp};
use common::{Owner, TTL, Widget, key, manager, manager_with};

async fn put_raw(provider: &InMemoryProvider, key: &Key, raw: &str) {
    let sentinel = provider.write_sentinel(SentinelType::Update, std::slice::from_ref(key)).await.expect("lock");
    let outcome = provider
        .set_value(key, std::slice::from_ref(key), raw, &sentinel, TTL)
        .await
        .expect("set");
    assert!(outcome.stored);
}

async fn cache(manager: &Manager<InMemoryProvider>, widget: &Widget) {
    let ctx = CacheContext::default();
    let sentinel = take_item_lock(&ctx, SentinelType::Create, manager, widget).await.expect("lock");
    assert!(save_item_to_cache(&ctx, manager, widget, &sentinel, false, &[]).await.is_stored());
    release_item_lock(&ctx, SentinelType::Create, manager, widget, &sentinel).await;
}

#[tokio::test]
async fn undecodable_entries_are_purged() {
    let ctx = CacheContext::default();
    let manager = manager();
    let primary = key("WIDGET", "broken");
    put_raw(manager.provider(), &primary, "{not json").await;

    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());
    assert_eq!(manager.provider().peek(&primary), None);

    // The next reader gets to repopulate.
    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, true).await;
    assert!(!lookup.sentinel.is_no_lock());
}

#[tokio::test]
async fn invalid_entries_are_purged() {
    let ctx = CacheContext::default();
    let manager = manager();
    let widget = Widget::new("w", "invalid").invalid();
    cache(&manager, &widget).await;
    let primary = widget.primary_key(manager.names());
    assert!(manager.provider().peek(&primary).is_some());

    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, false).await;
    assert!(!lookup.is_hit());
    assert_eq!(manager.provider().peek(&primary), None);
}

#[tokio::test]
async fn collections_with_an_invalid_member_are_purged_whole() {
    let ctx = CacheContext::default();
    let manager = manager();
    let owner = Owner { id: "o".to_owned() };
    let items = vec![Widget::new("a", "alpha"), Widget::new("b", "beta").invalid()];
    let collection = owner.per_item_collection_key(manager.names()).expect("collection key");

    let lookup = get_items_array_from_cache::<_, Widget>(&ctx, &manager, &collection, true).await;
    assert!(
        save_items_to_collection(&ctx, &manager, &owner, &items, &collection, &collection, &lookup.sentinel, false)
            .await
            .is_stored()
    );

    let lookup = get_items_array_from_cache::<_, Widget>(&ctx, &manager, &collection, false).await;
    assert!(!lookup.is_hit());
    assert_eq!(manager.provider().peek(&collection), None);
}

#[tokio::test]
async fn locked_keys_miss_without_a_lock() {
    let ctx = CacheContext::default();
    let manager = manager();
    let widget = Widget::new("w", "locked");
    let primary = widget.primary_key(manager.names());
    let held = take_item_lock(&ctx, SentinelType::Update, &manager, &widget).await.expect("lock");

    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());
    assert_eq!(manager.provider().peek(&primary).as_deref(), Some(held.as_str()));
}

#[tokio::test]
async fn batch_reads_keep_key_order() {
    let ctx = CacheContext::default();
    let manager = manager();
    let first = Widget::new("1", "one");
    let third = Widget::new("3", "three");
    cache(&manager, &first).await;
    cache(&manager, &third).await;

    let keys = [key("WIDGET", "1"), key("WIDGET", "2"), key("WIDGET", "3")];
    let lookups = get_items_from_cache::<_, Widget>(&ctx, &manager, &keys, true).await;

    assert_eq!(lookups.len(), 3);
    assert_eq!(lookups[0].item, Some(first));
    assert!(!lookups[1].is_hit());
    assert!(!lookups[1].sentinel.is_no_lock());
    assert_eq!(lookups[2].item, Some(third));

    assert!(get_items_from_cache::<_, Widget>(&ctx, &manager, &[], true).await.is_empty());
}

#[tokio::test]
async fn modified_marker_hides_the_cached_copy() {
    let ctx = CacheContext::default();
    let manager = manager();
    let widget = Widget::new("w", "marked");
    cache(&manager, &widget).await;
    let primary = widget.primary_key(manager.names());
    let modified = widget.is_modified_key(manager.names()).expect("modified key");

    let lookup = get_item_from_cache_with_modified_key::<_, Widget>(&ctx, &manager, &primary, &modified, true).await;
    assert_eq!(lookup.item, Some(widget));

    put_raw(manager.provider(), &modified, "1").await;
    let lookup = get_item_from_cache_with_modified_key::<_, Widget>(&ctx, &manager, &primary, &modified, true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());
}

#[tokio::test]
async fn modified_marker_releases_the_read_lock() {
    let ctx = CacheContext::default();
    let manager = manager();
    let primary = key("WIDGET", "fresh");
    let modified = key("WIDGET_MODIFIED", "fresh");
    put_raw(manager.provider(), &modified, "1").await;

    let lookup = get_item_from_cache_with_modified_key::<_, Widget>(&ctx, &manager, &primary, &modified, true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());
    assert_eq!(manager.provider().peek(&primary), None);
}

#[tokio::test]
async fn provider_failures_read_as_misses() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    manager
        .provider()
        .fail_when(|op| matches!(op, ProviderOp::GetValue { .. } | ProviderOp::GetValues { .. }));
    let primary = key("WIDGET", "w");

    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());

    let lookups = get_items_from_cache::<_, Widget>(&ctx, &manager, &[primary.clone(), key("WIDGET", "v")], true).await;
    assert!(lookups.iter().all(|lookup| !lookup.is_hit() && lookup.sentinel.is_no_lock()));

    let lookup =
        get_item_from_cache_with_modified_key::<_, Widget>(&ctx, &manager, &primary, &key("WIDGET_MODIFIED", "w"), true).await;
    assert!(!lookup.is_hit());
}
