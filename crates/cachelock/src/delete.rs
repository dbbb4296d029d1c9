// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Instant;

use cachelock_provider::{Provider, Sentinel, SentinelType};

use crate::{CacheContext, Manager, Result, SingleItem, item::ItemKeys};

/// Removes `item` from the cache, leaving tombstones behind.
///
/// Requires the sentinel of a delete lock from [`take_item_lock`](crate::take_item_lock),
/// which already invalidated the item's dependents. Every key the delete lock claimed, plus
/// the is-modified key, is tombstoned regardless of what it holds, so readers cannot
/// repopulate it until the tombstones expire.
///
/// # Errors
///
/// Returns [`Error::Provider`](crate::Error::Provider) if the provider fails.
pub async fn delete_item_from_cache<P, T>(ctx: &CacheContext, manager: &Manager<P>, item: &T, sentinel: &Sentinel) -> Result<()>
where
    P: Provider,
    T: SingleItem,
{
    if sentinel.is_no_lock() {
        return Ok(());
    }

    let provider = manager.provider();
    let keys = ItemKeys::of(item, manager.names());
    let mut targets = keys.lock_keys(SentinelType::Delete);
    targets.extend(keys.is_modified.iter().cloned());

    ctx.record_call();
    let started = Instant::now();
    let result = provider.delete_value(&targets, true, true).await;
    ctx.record_deletion(started.elapsed(), result.is_ok());

    if let Err(error) = &result {
        tracing::warn!(cache.name = provider.cache_name(), cache.key = %keys.primary, error = %error, "cache.delete_failed");
    } else {
        tracing::debug!(cache.name = provider.cache_name(), cache.key = %keys.primary, "cache.deleted");
    }
    Ok(result?)
}
