// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Declaring and withdrawing intent to modify cached items.

use cachelock_provider::{Key, Provider, Sentinel, SentinelType};

use crate::{CacheContext, Error, Manager, Result, SingleItem, item::ItemKeys};

/// Claims the keys `kind` needs on `item` before the authoritative store is touched.
///
/// Returns [`Sentinel::NO_LOCK`] when another operation holds the keys; saves and deletes
/// handed that sentinel do nothing. A delete lock also tombstones every key registered in
/// the item's dependency list, so that nothing depending on the item survives the delete.
///
/// # Errors
///
/// Returns [`Error::LockConflict`] if the provider fails or the dependents of a deleted item
/// cannot be invalidated. The caller should retry.
pub async fn take_item_lock<P, T>(ctx: &CacheContext, kind: SentinelType, manager: &Manager<P>, item: &T) -> Result<Sentinel>
where
    P: Provider,
    T: SingleItem,
{
    let keys = ItemKeys::of(item, manager.names());
    let lock_keys = keys.lock_keys(kind);
    let provider = manager.provider();
    ctx.record_call();

    let sentinel = match provider.write_sentinel(kind, &lock_keys).await {
        Ok(sentinel) => sentinel,
        Err(source) => {
            tracing::warn!(cache.name = provider.cache_name(), cache.key = %keys.primary, error = %source, "cache.lock_failed");
            return Err(Error::LockConflict {
                keys: lock_keys,
                source: Some(source),
            });
        }
    };

    if sentinel.is_no_lock() {
        tracing::debug!(cache.name = provider.cache_name(), cache.key = %keys.primary, cache.kind = %kind, "cache.lock_contended");
        return Ok(sentinel);
    }

    if kind == SentinelType::Delete
        && let Some(dependencies) = &keys.dependencies
        && let Err(source) = provider.clear_dependencies(dependencies, true).await
    {
        tracing::warn!(
            cache.name = provider.cache_name(),
            cache.key = %dependencies,
            error = %source,
            "cache.invalidate_dependents_failed"
        );
        provider.release_sentinel(&lock_keys, &sentinel).await;
        return Err(Error::LockConflict {
            keys: lock_keys,
            source: Some(source),
        });
    }

    tracing::debug!(cache.name = provider.cache_name(), cache.key = %keys.primary, cache.kind = %kind, "cache.lock_taken");
    Ok(sentinel)
}

/// Withdraws a lock taken by [`take_item_lock`]. Releasing [`Sentinel::NO_LOCK`] does nothing.
pub async fn release_item_lock<P, T>(ctx: &CacheContext, kind: SentinelType, manager: &Manager<P>, item: &T, sentinel: &Sentinel)
where
    P: Provider,
    T: SingleItem,
{
    if sentinel.is_no_lock() {
        return;
    }
    ctx.record_call();
    let keys = ItemKeys::of(item, manager.names()).lock_keys(kind);
    manager.provider().release_sentinel(&keys, sentinel).await;
}

fn collection_lock_keys<T: SingleItem>(kind: SentinelType, manager: &Manager<impl Provider>, item: &T, extra_keys: &[Key]) -> Result<Vec<Key>> {
    if !matches!(kind, SentinelType::Delete | SentinelType::Read) {
        return Err(Error::InvalidLockKind(kind));
    }
    let mut keys: Vec<Key> = item.per_item_collection_key(manager.names()).into_iter().collect();
    keys.extend(extra_keys.iter().cloned());
    Ok(keys)
}

/// Claims the per-item collection of `item`, plus `extra_keys`.
///
/// Only [`SentinelType::Delete`] and [`SentinelType::Read`] locks apply to collections.
///
/// # Errors
///
/// Returns [`Error::InvalidLockKind`] for create and update locks and
/// [`Error::LockConflict`] if the provider fails.
pub async fn take_per_item_collection_lock<P, T>(
    ctx: &CacheContext,
    kind: SentinelType,
    manager: &Manager<P>,
    item: &T,
    extra_keys: &[Key],
) -> Result<Sentinel>
where
    P: Provider,
    T: SingleItem,
{
    let keys = collection_lock_keys(kind, manager, item, extra_keys)?;
    ctx.record_call();
    manager.provider().write_sentinel(kind, &keys).await.map_err(|source| {
        tracing::warn!(cache.name = manager.provider().cache_name(), cache.keys = ?keys, error = %source, "cache.lock_failed");
        Error::LockConflict {
            keys: keys.clone(),
            source: Some(source),
        }
    })
}

/// Withdraws a lock taken by [`take_per_item_collection_lock`].
///
/// # Errors
///
/// Returns [`Error::InvalidLockKind`] for create and update locks.
pub async fn release_per_item_collection_lock<P, T>(
    ctx: &CacheContext,
    kind: SentinelType,
    manager: &Manager<P>,
    item: &T,
    extra_keys: &[Key],
    sentinel: &Sentinel,
) -> Result<()>
where
    P: Provider,
    T: SingleItem,
{
    let keys = collection_lock_keys(kind, manager, item, extra_keys)?;
    if sentinel.is_no_lock() {
        return Ok(());
    }
    ctx.record_call();
    manager.provider().release_sentinel(&keys, sentinel).await;
    Ok(())
}
