// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The write path: lock checks, collection limits and rollback.

mod common;

use std::time::Duration;

use cachelock::{
    CacheContext, Key, KeyNameProvider, MAX_COLLECTION_DEPENDENCIES, Manager, SKIP_CACHE_TTL, SaveOutcome, Sentinel,
    SentinelType, SingleItem, TtlProvider, Ttls, delete_item_from_cache, get_item_from_cache, get_items_array_from_cache, save_item_to_cache,
    save_items_to_collection, take_item_lock,
};
use cachelock_memory::InMemoryProvider;
use cachelock_provider::testing::{MockProvider, ProviderOp};
use common::{Owner, Widget, manager, manager_with, names};
use serde::{Deserialize, Serialize};
use tracing_test::traced_test;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Session {
    id: String,
}

impl SingleItem for Session {
    const CACHE_ID: &'static str = "SESSION";

    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_with_string("SESSION", &self.id)
    }

    fn ttl(_ttls: &dyn TtlProvider) -> Duration {
        SKIP_CACHE_TTL
    }
}

#[tokio::test]
async fn saving_without_a_lock_is_skipped() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    let widget = Widget::new("w", "unlocked");

    assert_eq!(
        save_item_to_cache(&ctx, &manager, &widget, &Sentinel::NO_LOCK, true, &[]).await,
        SaveOutcome::Skipped
    );
    assert!(manager.provider().operations().is_empty());
}

#[tokio::test]
async fn zero_ttl_disables_caching() {
    let ctx = CacheContext::default();
    let manager = Manager::new(
        MockProvider::new(InMemoryProvider::new()),
        names(),
        Ttls::new(Duration::from_secs(60)).with_ttl("WIDGET", SKIP_CACHE_TTL),
    );
    let widget = Widget::new("w", "uncached");

    let sentinel = Sentinel::new("__sentinel__update_held");
    assert_eq!(
        save_item_to_cache(&ctx, &manager, &widget, &sentinel, false, &[]).await,
        SaveOutcome::Skipped
    );
    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &widget.primary_key(manager.names()), true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());
    assert!(manager.provider().operations().is_empty());
}

#[tokio::test]
async fn types_that_opt_out_of_caching_are_never_read_or_locked() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    let session = Session { id: "s".to_owned() };
    let primary = session.primary_key(manager.names());

    let lookup = get_item_from_cache::<_, Session>(&ctx, &manager, &primary, true).await;
    assert!(!lookup.is_hit());
    assert!(lookup.sentinel.is_no_lock());

    let lookup = get_items_array_from_cache::<_, Session>(&ctx, &manager, &primary, true).await;
    assert!(lookup.sentinel.is_no_lock());

    let sentinel = Sentinel::new("__sentinel__update_held");
    assert_eq!(
        save_item_to_cache(&ctx, &manager, &session, &sentinel, false, &[]).await,
        SaveOutcome::Skipped
    );
    let owner = Owner { id: "o".to_owned() };
    assert_eq!(
        save_items_to_collection(&ctx, &manager, &owner, &[session.clone()], &primary, &primary, &sentinel, false).await,
        SaveOutcome::Skipped
    );
    assert!(manager.provider().operations().is_empty());
}

#[tokio::test]
async fn stale_reader_cannot_overwrite_a_newer_write() {
    let ctx = CacheContext::default();
    let manager = manager();
    let old = Widget::new("w", "old");
    let primary = old.primary_key(manager.names());

    // The reader misses and loads the old row.
    let reader = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, true).await;
    assert!(!reader.sentinel.is_no_lock());

    // A writer updates the row and caches the new state first.
    let mut new = old.clone();
    new.name = "new".to_owned();
    let writer = take_item_lock(&ctx, SentinelType::Update, &manager, &new).await.expect("lock");
    assert_eq!(
        save_item_to_cache(&ctx, &manager, &new, &writer, true, &[]).await,
        SaveOutcome::Stored
    );

    assert_eq!(
        save_item_to_cache(&ctx, &manager, &old, &reader.sentinel, false, &[]).await,
        SaveOutcome::Conflict
    );
    let lookup = get_item_from_cache::<_, Widget>(&ctx, &manager, &primary, false).await;
    assert_eq!(lookup.item, Some(new));
}

#[tokio::test]
async fn save_under_a_delete_lock_stores_nothing() {
    let ctx = CacheContext::default();
    let manager = manager();
    let widget = Widget::new("w", "doomed");
    let primary = widget.primary_key(manager.names());

    let sentinel = take_item_lock(&ctx, SentinelType::Delete, &manager, &widget).await.expect("lock");
    assert_eq!(
        save_item_to_cache(&ctx, &manager, &widget, &sentinel, false, &[]).await,
        SaveOutcome::Conflict
    );
    assert_eq!(manager.provider().peek(&primary), None);

    delete_item_from_cache(&ctx, &manager, &widget, &sentinel).await.expect("delete");
}

#[tokio::test]
async fn failed_registration_rolls_the_write_back() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    let widget = Widget::new("w", "owned").owned_by("o");
    manager
        .provider()
        .fail_when(|op| matches!(op, ProviderOp::AddDependency { .. }));

    let sentinel = take_item_lock(&ctx, SentinelType::Create, &manager, &widget).await.expect("lock");
    let outcome = save_item_to_cache(&ctx, &manager, &widget, &sentinel, false, &[]).await;
    assert_eq!(outcome, SaveOutcome::RolledBack);
    assert!(!outcome.is_stored());

    let inner = manager.provider().inner();
    assert_eq!(inner.peek(&widget.primary_key(manager.names())), None);
    assert_eq!(inner.peek(&manager.names().key_name_with_string("WIDGET_BY_NAME", "owned")), None);
}

#[tokio::test]
async fn tombstoned_owner_blocks_new_dependents() {
    let ctx = CacheContext::default();
    let manager = manager();
    let owner = Owner { id: "o".to_owned() };
    let widget = Widget::new("w", "orphan").owned_by("o");

    let sentinel = take_item_lock(&ctx, SentinelType::Delete, &manager, &owner).await.expect("lock");
    delete_item_from_cache(&ctx, &manager, &owner, &sentinel).await.expect("delete");

    let sentinel = take_item_lock(&ctx, SentinelType::Create, &manager, &widget).await.expect("lock");
    assert_eq!(
        save_item_to_cache(&ctx, &manager, &widget, &sentinel, true, &[]).await,
        SaveOutcome::RolledBack
    );
    assert_eq!(manager.provider().peek(&widget.primary_key(manager.names())), None);
}

#[tokio::test]
#[traced_test]
async fn failed_rollback_is_reported() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    let widget = Widget::new("w", "stale").owned_by("o");

    let sentinel = take_item_lock(&ctx, SentinelType::Create, &manager, &widget).await.expect("lock");
    manager
        .provider()
        .fail_when(|op| matches!(op, ProviderOp::AddDependency { .. } | ProviderOp::DeleteValue { .. }));

    let outcome = save_item_to_cache(&ctx, &manager, &widget, &sentinel, false, &[]).await;
    assert_eq!(outcome, SaveOutcome::RollbackFailed);
    assert!(outcome.is_stored());
    assert!(logs_contain("cache.rollback_failed"));
}

fn fan_out(count: usize) -> Vec<Widget> {
    (0..count).map(|i| Widget::new(&format!("w{i}"), &format!("name{i}"))).collect()
}

async fn save_global_collection(items: &[Widget]) -> SaveOutcome {
    let ctx = CacheContext::default();
    let manager = manager();
    let owner = Owner { id: "o".to_owned() };
    let collection = manager.names().key_name_static("ALL_WIDGETS");

    let lookup = get_items_array_from_cache::<_, Widget>(&ctx, &manager, &collection, true).await;
    assert!(!lookup.sentinel.is_no_lock());
    save_items_to_collection(&ctx, &manager, &owner, items, &collection, &collection, &lookup.sentinel, true).await
}

#[tokio::test]
async fn collections_up_to_the_dependency_limit_are_cached() {
    let items = fan_out(MAX_COLLECTION_DEPENDENCIES);
    assert_eq!(save_global_collection(&items).await, SaveOutcome::Stored);
}

#[tokio::test]
async fn collections_beyond_the_dependency_limit_are_not_cached() {
    let items = fan_out(MAX_COLLECTION_DEPENDENCIES + 1);
    assert_eq!(save_global_collection(&items).await, SaveOutcome::NotCached);
}

#[tokio::test]
async fn collection_save_registers_before_writing() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    let owner = Owner { id: "o".to_owned() };
    let items = vec![Widget::new("a", "alpha").owned_by("o")];
    let collection = owner.per_item_collection_key(manager.names()).expect("collection key");

    let lookup = get_items_array_from_cache::<_, Widget>(&ctx, &manager, &collection, true).await;
    manager.provider().clear_operations();
    assert_eq!(
        save_items_to_collection(&ctx, &manager, &owner, &items, &collection, &collection, &lookup.sentinel, false).await,
        SaveOutcome::Stored
    );

    let ops = manager.provider().operations();
    assert!(matches!(ops.as_slice(), [ProviderOp::AddDependency { .. }, ProviderOp::SetValue { .. }]));
    let ProviderOp::AddDependency { dependency_keys, dependent_keys } = &ops[0] else {
        unreachable!();
    };
    let names = manager.names();
    assert_eq!(
        dependency_keys,
        &[names.key_name_with_string("OWNER_DEPS", "o"), names.key_name_with_string("WIDGET_DEPS", "a")]
    );
    assert_eq!(dependent_keys, &[collection]);
}

#[tokio::test]
async fn failed_collection_registration_writes_nothing() {
    let ctx = CacheContext::default();
    let manager = manager_with(MockProvider::new(InMemoryProvider::new()));
    let owner = Owner { id: "o".to_owned() };
    let items = vec![Widget::new("a", "alpha")];
    let collection = owner.per_item_collection_key(manager.names()).expect("collection key");

    let lookup = get_items_array_from_cache::<_, Widget>(&ctx, &manager, &collection, true).await;
    manager
        .provider()
        .fail_when(|op| matches!(op, ProviderOp::AddDependency { .. }));
    assert_eq!(
        save_items_to_collection(&ctx, &manager, &owner, &items, &collection, &collection, &lookup.sentinel, false).await,
        SaveOutcome::NotCached
    );
    assert_eq!(manager.provider().inner().peek(&collection).as_deref(), Some(lookup.sentinel.as_str()));
}
