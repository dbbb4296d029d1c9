// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backend contract.
//!
//! [`Provider`] is everything the consistency algorithms need from a key/value store. All
//! shared state lives behind it; callers hold nothing but keys and sentinels.

use std::{sync::Arc, time::Duration};

use crate::{Key, Result, Sentinel, SentinelType};

/// Callback invoked with a key when the provider invalidates it.
pub type InvalidationHandler = Arc<dyn Fn(&Key) + Send + Sync>;

/// Per-key result of [`Provider::get_value`] and [`Provider::get_values`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueLookup {
    /// The cached value, if the slot holds one.
    pub value: Option<String>,
    /// The raw sentinel or tombstone found in the slot, if any.
    pub conflict: Option<String>,
    /// The read lock taken on a miss, or [`Sentinel::NO_LOCK`].
    pub sentinel: Sentinel,
}

impl ValueLookup {
    /// A lookup that found a cached value.
    #[must_use]
    pub fn hit(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }
}

/// Result of [`Provider::set_value`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOutcome {
    /// The value was written to every target key.
    pub stored: bool,
    /// The lock key no longer held the caller's sentinel.
    pub conflict: bool,
}

/// Backend contract for the consistency layer.
///
/// Every method may be called concurrently from many tasks and processes. Two guarantees are
/// load-bearing and must be furnished by the backend:
///
/// - [`set_value`](Provider::set_value) is a compare-and-swap: the value is written only while
///   the lock key still holds the caller's sentinel, atomically with that check.
/// - [`write_sentinel`](Provider::write_sentinel) claims all keys or none of them.
///
/// Multi-key calls receive the primary key first; implementations may rely on that order.
pub trait Provider: Send + Sync {
    /// Reads one slot, taking a read lock when it is empty and `lock_on_miss` is set.
    fn get_value(&self, key: &Key, lock_on_miss: bool) -> impl Future<Output = Result<ValueLookup>> + Send;

    /// Batched [`get_value`](Provider::get_value); `lock_on_miss` pairs with `keys` by index.
    fn get_values(&self, keys: &[Key], lock_on_miss: &[bool]) -> impl Future<Output = Result<Vec<ValueLookup>>> + Send;

    /// Writes `value` to every key in `keys_to_set` if `lock_key` still holds `sentinel`.
    fn set_value(
        &self,
        lock_key: &Key,
        keys_to_set: &[Key],
        value: &str,
        sentinel: &Sentinel,
        ttl: Duration,
    ) -> impl Future<Output = Result<SetOutcome>> + Send;

    /// Deletes the slots at `keys`.
    ///
    /// Without `force`, slots holding a live sentinel are left alone. With `set_tombstone`,
    /// each slot is replaced by a short-lived tombstone instead of being emptied.
    fn delete_value(&self, keys: &[Key], set_tombstone: bool, force: bool) -> impl Future<Output = Result<()>> + Send;

    /// Tries to claim every key with a fresh sentinel of `kind`.
    ///
    /// Returns [`Sentinel::NO_LOCK`] when any key is held incompatibly.
    fn write_sentinel(&self, kind: SentinelType, keys: &[Key]) -> impl Future<Output = Result<Sentinel>> + Send;

    /// Clears `sentinel` from each key still holding it. Failures are logged, never returned.
    fn release_sentinel(&self, keys: &[Key], sentinel: &Sentinel) -> impl Future<Output = ()> + Send;

    /// Appends `dependent_keys` to the dependency list at each of `dependency_keys`.
    ///
    /// Fails without modifying anything if any dependency key holds a tombstone.
    fn add_dependency(&self, dependency_keys: &[Key], dependent_keys: &[Key], ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Deletes every key listed at `key`, then clears or tombstones `key` itself.
    fn clear_dependencies(&self, key: &Key, set_tombstone: bool) -> impl Future<Output = Result<()>> + Send;

    /// Removes every key starting with `prefix`. Tombstones survive unless `flush_tombstones`.
    fn flush(&self, prefix: &str, flush_tombstones: bool) -> impl Future<Output = Result<()>> + Send;

    /// Returns a human-readable name for logs.
    fn cache_name(&self) -> &str;

    /// Registers a callback for invalidations of `key`.
    fn register_invalidation_handler(&self, handler: InvalidationHandler, key: &Key) -> impl Future<Output = Result<()>> + Send;
}
