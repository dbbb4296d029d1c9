// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The write path.
//!
//! A single item is written before its dependencies are registered, and undone if the
//! registration fails. A collection registers its dependencies first and is only written
//! once they are in place, so a concurrent invalidation can never miss it.

use std::{collections::BTreeSet, slice, time::Instant};

use cachelock_provider::{Key, Provider, Sentinel, SentinelType};

use crate::{CacheContext, Manager, SingleItem, item::ItemKeys, lock};

/// Collections depending on more keys than this are not cached.
pub const MAX_COLLECTION_DEPENDENCIES: usize = 100;

/// What a save did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SaveOutcome {
    /// Nothing was attempted: the TTL disables caching or no lock was held.
    Skipped,
    /// The lock was lost to a concurrent operation; nothing was written.
    Conflict,
    /// The value is cached.
    Stored,
    /// The value could not be written, or a collection was too wide to track.
    NotCached,
    /// The value was written, but registering it failed and it was deleted again.
    RolledBack,
    /// The value was written, registering it failed and deleting it failed too.
    ///
    /// The cache may serve this value after its dependencies change, until it expires.
    RollbackFailed,
}

impl SaveOutcome {
    /// Returns `true` if the value is cached.
    #[must_use]
    pub fn is_stored(self) -> bool {
        matches!(self, Self::Stored | Self::RollbackFailed)
    }
}

/// Caches `item` under its primary and secondary keys.
///
/// Requires the sentinel of a lock on the primary key. With `clear_collection`, the global
/// collection, the is-modified key, `extra_collection_keys` and everything registered in the
/// item's own dependency list are invalidated after the write, as a create or update must.
pub async fn save_item_to_cache<P, T>(
    ctx: &CacheContext,
    manager: &Manager<P>,
    item: &T,
    sentinel: &Sentinel,
    clear_collection: bool,
    extra_collection_keys: &[Key],
) -> SaveOutcome
where
    P: Provider,
    T: SingleItem,
{
    let ttl = T::ttl(manager.ttls());
    if ttl.is_zero() || sentinel.is_no_lock() {
        return SaveOutcome::Skipped;
    }

    let provider = manager.provider();
    let names = manager.names();
    let keys = ItemKeys::of(item, names);
    let value = match serde_json::to_string(item) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(cache.name = provider.cache_name(), cache.key = %keys.primary, error = %error, "cache.serialize_failed");
            return SaveOutcome::NotCached;
        }
    };

    let cached = keys.cached();
    ctx.record_call();
    let started = Instant::now();
    let result = provider.set_value(&keys.primary, &cached, &value, sentinel, ttl).await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            ctx.record_store(started.elapsed(), false);
            tracing::warn!(cache.name = provider.cache_name(), cache.key = %keys.primary, error = %error, "cache.store_failed");
            return SaveOutcome::NotCached;
        }
    };
    if !outcome.stored {
        ctx.record_store(started.elapsed(), false);
        tracing::debug!(cache.name = provider.cache_name(), cache.key = %keys.primary, cache.sentinel = %sentinel, "cache.store_conflict");
        return SaveOutcome::Conflict;
    }

    let mut clear_keys_on_error = false;

    if clear_collection {
        let stale: Vec<Key> = keys
            .global_collection
            .iter()
            .chain(&keys.is_modified)
            .chain(extra_collection_keys)
            .cloned()
            .collect();
        if !stale.is_empty()
            && let Err(error) = provider.delete_value(&stale, false, true).await
        {
            tracing::warn!(cache.name = provider.cache_name(), cache.keys = ?stale, error = %error, "cache.invalidate_collections_failed");
            clear_keys_on_error = true;
        }

        if let Some(dependencies) = &keys.dependencies
            && let Err(error) = provider.clear_dependencies(dependencies, false).await
        {
            tracing::warn!(cache.name = provider.cache_name(), cache.key = %dependencies, error = %error, "cache.invalidate_dependents_failed");
            clear_keys_on_error = true;
        }
    }

    let dependency_keys = item.dependency_keys(names);
    if !dependency_keys.is_empty()
        && let Err(error) = provider.add_dependency(&dependency_keys, &cached, ttl).await
    {
        tracing::warn!(cache.name = provider.cache_name(), cache.key = %keys.primary, error = %error, "cache.add_dependency_failed");
        clear_keys_on_error = true;
    }

    if let Some(dependencies) = &keys.dependencies
        && !keys.secondary.is_empty()
        && let Err(error) = provider.add_dependency(slice::from_ref(dependencies), &keys.secondary, ttl).await
    {
        tracing::debug!(cache.name = provider.cache_name(), cache.key = %dependencies, error = %error, "cache.add_secondary_dependency_failed");
    }

    if clear_keys_on_error {
        let rolled_back = provider.delete_value(&cached, false, true).await;
        ctx.record_store(started.elapsed(), false);
        return match rolled_back {
            Ok(()) => SaveOutcome::RolledBack,
            Err(error) => {
                tracing::error!(cache.name = provider.cache_name(), cache.keys = ?cached, error = %error, "cache.rollback_failed");
                SaveOutcome::RollbackFailed
            }
        };
    }

    ctx.record_store(started.elapsed(), true);
    tracing::debug!(cache.name = provider.cache_name(), cache.key = %keys.primary, "cache.stored");
    SaveOutcome::Stored
}

/// Caches `items` as one collection blob at `collection_key`.
///
/// `sentinel` must be held on `lock_key`. The collection depends on every member's
/// dependency keys and dependencies key, and, unless `is_global`, on the dependencies key of
/// `owner`. It takes its TTL from `owner`. Collections with more than
/// [`MAX_COLLECTION_DEPENDENCIES`] dependencies are not cached.
#[expect(clippy::too_many_arguments, reason = "mirrors the per-item save signature plus the collection keys")]
pub async fn save_items_to_collection<P, O, T>(
    ctx: &CacheContext,
    manager: &Manager<P>,
    owner: &O,
    items: &[T],
    lock_key: &Key,
    collection_key: &Key,
    sentinel: &Sentinel,
    is_global: bool,
) -> SaveOutcome
where
    P: Provider,
    O: SingleItem,
    T: SingleItem,
{
    let ttl = O::ttl(manager.ttls());
    if ttl.is_zero() || T::ttl(manager.ttls()).is_zero() || sentinel.is_no_lock() {
        return SaveOutcome::Skipped;
    }

    let provider = manager.provider();
    let names = manager.names();

    let mut dependencies = BTreeSet::new();
    for item in items {
        dependencies.extend(item.dependency_keys(names));
        dependencies.extend(item.dependencies_key(names));
    }
    if !is_global {
        dependencies.extend(owner.dependencies_key(names));
    }
    if dependencies.len() > MAX_COLLECTION_DEPENDENCIES {
        tracing::debug!(
            cache.name = provider.cache_name(),
            cache.key = %collection_key,
            cache.dependencies = dependencies.len(),
            "cache.collection_too_wide"
        );
        return SaveOutcome::NotCached;
    }

    let value = match serde_json::to_string(items) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(cache.name = provider.cache_name(), cache.key = %collection_key, error = %error, "cache.serialize_failed");
            return SaveOutcome::NotCached;
        }
    };

    ctx.record_call();
    let started = Instant::now();
    let dependencies: Vec<Key> = dependencies.into_iter().collect();
    if !dependencies.is_empty()
        && let Err(error) = provider
            .add_dependency(&dependencies, slice::from_ref(collection_key), ttl)
            .await
    {
        ctx.record_store(started.elapsed(), false);
        tracing::warn!(cache.name = provider.cache_name(), cache.key = %collection_key, error = %error, "cache.add_dependency_failed");
        return SaveOutcome::NotCached;
    }

    let result = provider
        .set_value(lock_key, slice::from_ref(collection_key), &value, sentinel, ttl)
        .await;
    match result {
        Ok(outcome) if outcome.stored => {
            ctx.record_store(started.elapsed(), true);
            tracing::debug!(cache.name = provider.cache_name(), cache.key = %collection_key, cache.items = items.len(), "cache.stored");
            SaveOutcome::Stored
        }
        Ok(_) => {
            ctx.record_store(started.elapsed(), false);
            tracing::debug!(cache.name = provider.cache_name(), cache.key = %collection_key, cache.sentinel = %sentinel, "cache.store_conflict");
            SaveOutcome::Conflict
        }
        Err(error) => {
            ctx.record_store(started.elapsed(), false);
            tracing::warn!(cache.name = provider.cache_name(), cache.key = %collection_key, error = %error, "cache.store_failed");
            SaveOutcome::NotCached
        }
    }
}

/// Caches every member of a freshly loaded collection individually.
///
/// Each item is saved under a read lock on its primary key, so members already cached or
/// being modified are left alone. Returns how many items were stored.
pub async fn save_items_from_collection_to_cache<P, T>(ctx: &CacheContext, manager: &Manager<P>, items: &[T]) -> usize
where
    P: Provider,
    T: SingleItem,
{
    let mut stored = 0;
    for item in items {
        let sentinel = match lock::take_item_lock(ctx, SentinelType::Read, manager, item).await {
            Ok(sentinel) if !sentinel.is_no_lock() => sentinel,
            Ok(_) | Err(_) => continue,
        };
        if save_item_to_cache(ctx, manager, item, &sentinel, false, &[]).await.is_stored() {
            stored += 1;
        }
        lock::release_item_lock(ctx, SentinelType::Read, manager, item, &sentinel).await;
    }
    stored
}
