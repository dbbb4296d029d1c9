// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The read path.
//!
//! Reads never fail. Backend errors, undecodable entries and entries failing
//! [`SingleItem::validate`] are logged and reported as misses; the last two are also purged
//! so the next reader repopulates them.

use std::{fmt, slice, time::Instant};

use cachelock_provider::{Key, Provider, Sentinel, ValueLookup};
use serde::de::DeserializeOwned;

use crate::{CacheContext, Manager, SingleItem};

/// Result of a cache read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lookup<T> {
    /// The cached item, on a hit.
    pub item: Option<T>,
    /// The read lock taken on a miss, or [`Sentinel::NO_LOCK`].
    ///
    /// The holder should load the item from the authoritative store, save it with this
    /// sentinel and release it.
    pub sentinel: Sentinel,
}

impl<T> Lookup<T> {
    fn hit(item: T) -> Self {
        Self {
            item: Some(item),
            sentinel: Sentinel::NO_LOCK,
        }
    }

    fn miss(sentinel: Sentinel) -> Self {
        Self { item: None, sentinel }
    }

    /// Returns `true` if the lookup found an item.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.item.is_some()
    }
}

/// A decoded entry that must not be served.
enum Rejected {
    Corrupt(serde_json::Error),
    Invalid(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt(error) => write!(f, "undecodable entry: {error}"),
            Self::Invalid(error) => write!(f, "invalid entry: {error}"),
        }
    }
}

type Check<C> = fn(&C) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[expect(clippy::ptr_arg, reason = "must match `Check<Vec<T>>`")]
fn check_all<T: SingleItem>(items: &Vec<T>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    items.iter().try_for_each(T::validate)
}

fn skip<P: Provider, T: SingleItem>(manager: &Manager<P>) -> bool {
    T::ttl(manager.ttls()).is_zero()
}

async fn purge<P: Provider>(manager: &Manager<P>, key: &Key) {
    let provider = manager.provider();
    if let Err(error) = provider.delete_value(slice::from_ref(key), false, true).await {
        tracing::warn!(cache.name = provider.cache_name(), cache.key = %key, error = %error, "cache.purge_failed");
    }
}

async fn decode<P: Provider, C: DeserializeOwned>(
    ctx: &CacheContext,
    manager: &Manager<P>,
    key: &Key,
    lookup: ValueLookup,
    check: Check<C>,
) -> Lookup<C> {
    let provider = manager.provider();
    let Some(raw) = lookup.value else {
        ctx.record_lookup(false);
        tracing::debug!(cache.name = provider.cache_name(), cache.key = %key, cache.locked = !lookup.sentinel.is_no_lock(), "cache.miss");
        return Lookup::miss(lookup.sentinel);
    };

    let checked = serde_json::from_str::<C>(&raw)
        .map_err(Rejected::Corrupt)
        .and_then(|item| check(&item).map(|()| item).map_err(Rejected::Invalid));

    match checked {
        Ok(item) => {
            ctx.record_lookup(true);
            tracing::debug!(cache.name = provider.cache_name(), cache.key = %key, "cache.hit");
            Lookup::hit(item)
        }
        Err(rejected) => {
            ctx.record_lookup(false);
            tracing::error!(cache.name = provider.cache_name(), cache.key = %key, error = %rejected, "cache.entry_rejected");
            purge(manager, key).await;
            Lookup::miss(Sentinel::NO_LOCK)
        }
    }
}

async fn fetch<P: Provider, C: DeserializeOwned>(ctx: &CacheContext, manager: &Manager<P>, key: &Key, lock_on_miss: bool, check: Check<C>) -> Lookup<C> {
    ctx.record_call();
    let started = Instant::now();
    let result = manager.provider().get_value(key, lock_on_miss).await;
    ctx.record_get(started.elapsed());

    match result {
        Ok(lookup) => decode(ctx, manager, key, lookup, check).await,
        Err(error) => {
            ctx.record_lookup(false);
            tracing::warn!(cache.name = manager.provider().cache_name(), cache.key = %key, error = %error, "cache.get_failed");
            Lookup::miss(Sentinel::NO_LOCK)
        }
    }
}

/// Reads the item cached at `key`.
///
/// On a miss with `lock_on_miss`, the returned lookup carries a read lock on `key` that the
/// caller should save under and release.
pub async fn get_item_from_cache<P, T>(ctx: &CacheContext, manager: &Manager<P>, key: &Key, lock_on_miss: bool) -> Lookup<T>
where
    P: Provider,
    T: SingleItem,
{
    if skip::<P, T>(manager) {
        return Lookup::miss(Sentinel::NO_LOCK);
    }
    fetch(ctx, manager, key, lock_on_miss, T::validate).await
}

/// Reads the item cached at `key` unless `modified_key` is set.
///
/// Anything stored at `modified_key` means another writer changed the item, so the cached
/// copy is not served and any read lock just taken on `key` is released again.
pub async fn get_item_from_cache_with_modified_key<P, T>(
    ctx: &CacheContext,
    manager: &Manager<P>,
    key: &Key,
    modified_key: &Key,
    lock_on_miss: bool,
) -> Lookup<T>
where
    P: Provider,
    T: SingleItem,
{
    if skip::<P, T>(manager) {
        return Lookup::miss(Sentinel::NO_LOCK);
    }

    let provider = manager.provider();
    ctx.record_call();
    let started = Instant::now();
    let result = provider
        .get_values(&[key.clone(), modified_key.clone()], &[lock_on_miss, false])
        .await;
    ctx.record_get(started.elapsed());

    let mut lookups = match result {
        Ok(lookups) => lookups.into_iter(),
        Err(error) => {
            ctx.record_lookup(false);
            tracing::warn!(cache.name = provider.cache_name(), cache.key = %key, error = %error, "cache.get_failed");
            return Lookup::miss(Sentinel::NO_LOCK);
        }
    };
    let (Some(lookup), Some(modified)) = (lookups.next(), lookups.next()) else {
        ctx.record_lookup(false);
        tracing::warn!(cache.name = provider.cache_name(), cache.key = %key, "cache.get_truncated");
        return Lookup::miss(Sentinel::NO_LOCK);
    };

    if modified.value.is_some() || modified.conflict.is_some() {
        provider.release_sentinel(slice::from_ref(key), &lookup.sentinel).await;
        ctx.record_lookup(false);
        tracing::debug!(cache.name = provider.cache_name(), cache.key = %key, cache.modified_key = %modified_key, "cache.modified");
        return Lookup::miss(Sentinel::NO_LOCK);
    }

    decode(ctx, manager, key, lookup, T::validate).await
}

/// Reads the items cached at each of `keys`, in order.
pub async fn get_items_from_cache<P, T>(ctx: &CacheContext, manager: &Manager<P>, keys: &[Key], lock_on_miss: bool) -> Vec<Lookup<T>>
where
    P: Provider,
    T: SingleItem,
{
    let misses = || -> Vec<Lookup<T>> { keys.iter().map(|_| Lookup::miss(Sentinel::NO_LOCK)).collect() };
    if keys.is_empty() || skip::<P, T>(manager) {
        return misses();
    }

    let provider = manager.provider();
    ctx.record_call();
    let started = Instant::now();
    let result = provider.get_values(keys, &vec![lock_on_miss; keys.len()]).await;
    ctx.record_get(started.elapsed());

    let lookups = match result {
        Ok(lookups) => lookups,
        Err(error) => {
            keys.iter().for_each(|_| ctx.record_lookup(false));
            tracing::warn!(cache.name = provider.cache_name(), cache.keys = ?keys, error = %error, "cache.get_failed");
            return misses();
        }
    };

    let mut items = Vec::with_capacity(keys.len());
    for (key, lookup) in keys.iter().zip(lookups) {
        items.push(decode(ctx, manager, key, lookup, T::validate).await);
    }
    items
}

/// Reads a collection cached as one blob at `key`.
///
/// A collection with any member failing validation is purged as a whole.
pub async fn get_items_array_from_cache<P, T>(ctx: &CacheContext, manager: &Manager<P>, key: &Key, lock_on_miss: bool) -> Lookup<Vec<T>>
where
    P: Provider,
    T: SingleItem,
{
    if skip::<P, T>(manager) {
        return Lookup::miss(Sentinel::NO_LOCK);
    }
    fetch(ctx, manager, key, lock_on_miss, check_all::<T>).await
}
