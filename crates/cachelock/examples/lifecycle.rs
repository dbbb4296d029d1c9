// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle Example
//!
//! Walks one item through read-through caching, an update, a racing stale reader and a
//! delete, logging every cache operation.

use std::time::Duration;

use cachelock::{
    CacheContext, InMemoryProvider, Key, KeyNameProvider, KeyNames, Manager, SentinelType, SingleItem, Ttls, delete_item_from_cache,
    get_item_from_cache, get_metrics, release_item_lock, save_item_to_cache, take_item_lock,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Account {
    id: String,
    email: String,
    balance: u64,
}

impl SingleItem for Account {
    const CACHE_ID: &'static str = "ACCOUNT";

    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_with_string("ACCOUNT", &self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        vec![names.key_name_with_string("ACCOUNT_BY_EMAIL", &self.email)]
    }

    fn dependencies_key(&self, names: &dyn KeyNameProvider) -> Option<Key> {
        Some(names.key_name_with_string("ACCOUNT_DEPS", &self.id))
    }
}

#[tokio::main]
async fn main() -> Result<(), cachelock::Error> {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let ctx = CacheContext::with_metrics();
    let names = KeyNames::new("bank").with_template("ACCOUNT", "ACCOUNT_{}");
    let manager = Manager::new(InMemoryProvider::new(), names, Ttls::new(Duration::from_secs(60)));

    let account = Account {
        id: "42".to_string(),
        email: "ada@example.com".to_string(),
        balance: 100,
    };
    let key = account.primary_key(manager.names());

    // A reader misses and loads the row, but is slow to cache it
    let reader = get_item_from_cache::<_, Account>(&ctx, &manager, &key, true).await;

    // Meanwhile a writer declares an update, commits it and caches the new state
    let updated = Account { balance: 50, ..account.clone() };
    let sentinel = take_item_lock(&ctx, SentinelType::Update, &manager, &updated).await?;
    let outcome = save_item_to_cache(&ctx, &manager, &updated, &sentinel, true, &[]).await;
    tracing::info!(?outcome, "writer saved");
    release_item_lock(&ctx, SentinelType::Update, &manager, &updated, &sentinel).await;

    // The reader's stale row loses (SaveOutcome::Conflict)
    let outcome = save_item_to_cache(&ctx, &manager, &account, &reader.sentinel, false, &[]).await;
    tracing::info!(?outcome, "reader saved");
    release_item_lock(&ctx, SentinelType::Read, &manager, &account, &reader.sentinel).await;

    // Later readers see the update
    let cached = get_item_from_cache::<_, Account>(&ctx, &manager, &key, true).await;
    tracing::info!(balance = cached.item.map(|account| account.balance), "read after write");

    // Delete and leave tombstones behind
    let sentinel = take_item_lock(&ctx, SentinelType::Delete, &manager, &updated).await?;
    delete_item_from_cache(&ctx, &manager, &updated, &sentinel).await?;

    manager.provider().log_key_values(manager.names().prefix());
    let metrics = get_metrics(&ctx)?;
    tracing::info!(
        calls = metrics.calls,
        hits = metrics.hits,
        misses = metrics.misses,
        stores = metrics.stores,
        deletions = metrics.deletions,
        "lifecycle complete"
    );
    Ok(())
}
