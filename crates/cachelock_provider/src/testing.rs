// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Recording provider for testing.
//!
//! [`MockProvider`] wraps any [`Provider`], records every call it forwards and can be told to
//! fail selected calls, which makes the degrade-and-log paths of the algorithms testable.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{Error, InvalidationHandler, Key, Provider, Result, Sentinel, SentinelType, SetOutcome, ValueLookup};

/// A provider call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOp {
    /// [`Provider::get_value`].
    GetValue {
        /// The key read.
        key: Key,
        /// Whether a read lock was requested on miss.
        lock_on_miss: bool,
    },
    /// [`Provider::get_values`].
    GetValues {
        /// The keys read.
        keys: Vec<Key>,
        /// Per-key lock-on-miss flags.
        lock_on_miss: Vec<bool>,
    },
    /// [`Provider::set_value`].
    SetValue {
        /// The key whose sentinel guards the write.
        lock_key: Key,
        /// The keys written.
        keys: Vec<Key>,
        /// The value written.
        value: String,
        /// The guarding sentinel.
        sentinel: Sentinel,
    },
    /// [`Provider::delete_value`].
    DeleteValue {
        /// The keys deleted.
        keys: Vec<Key>,
        /// Whether tombstones replace the values.
        set_tombstone: bool,
        /// Whether live sentinels are deleted too.
        force: bool,
    },
    /// [`Provider::write_sentinel`].
    WriteSentinel {
        /// The lock kind requested.
        kind: SentinelType,
        /// The keys to claim.
        keys: Vec<Key>,
    },
    /// [`Provider::release_sentinel`].
    ReleaseSentinel {
        /// The keys to release.
        keys: Vec<Key>,
        /// The sentinel released.
        sentinel: Sentinel,
    },
    /// [`Provider::add_dependency`].
    AddDependency {
        /// The lists appended to.
        dependency_keys: Vec<Key>,
        /// The keys appended.
        dependent_keys: Vec<Key>,
    },
    /// [`Provider::clear_dependencies`].
    ClearDependencies {
        /// The list cleared.
        key: Key,
        /// Whether tombstones are left behind.
        set_tombstone: bool,
    },
    /// [`Provider::flush`].
    Flush {
        /// The namespace flushed.
        prefix: String,
        /// Whether tombstones are flushed too.
        flush_tombstones: bool,
    },
    /// [`Provider::register_invalidation_handler`].
    RegisterInvalidationHandler {
        /// The key watched.
        key: Key,
    },
}

type FailPredicate = Box<dyn Fn(&ProviderOp) -> bool + Send + Sync>;

/// A recording, failure-injecting wrapper around another provider.
///
/// Calls matching the predicate installed with [`fail_when`](MockProvider::fail_when) return a
/// backend error without reaching the inner provider. A failing `release_sentinel` is
/// swallowed, as the contract demands.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use cachelock_provider::{
///     Key, Provider,
///     testing::{MockProvider, ProviderOp},
/// };
///
/// # async fn example<P: Provider>(backend: P) {
/// let provider = MockProvider::new(backend);
///
/// // Fail every dependency registration.
/// provider.fail_when(|op| matches!(op, ProviderOp::AddDependency { .. }));
///
/// let deps = [Key::from("ns:OWNER_DEPS_1")];
/// let dependents = [Key::from("ns:OBJ_1")];
/// assert!(provider.add_dependency(&deps, &dependents, Duration::from_secs(60)).await.is_err());
///
/// // Failed calls are still recorded.
/// assert!(matches!(provider.operations().as_slice(), [ProviderOp::AddDependency { .. }]));
/// # }
/// ```
pub struct MockProvider<P> {
    inner: P,
    operations: Arc<Mutex<Vec<ProviderOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl<P: fmt::Debug> fmt::Debug for MockProvider<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("inner", &self.inner)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl<P: Clone> Clone for MockProvider<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
        }
    }
}

impl<P> MockProvider<P> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the wrapped provider.
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Sets a predicate selecting the calls that fail.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&ProviderOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Removes the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a copy of every recorded call.
    #[must_use]
    pub fn operations(&self) -> Vec<ProviderOp> {
        self.operations.lock().clone()
    }

    /// Forgets every recorded call.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Records `op` and reports whether it must fail.
    fn record(&self, op: ProviderOp) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);
        if fail { Err(Error::backend("mock: injected failure")) } else { Ok(()) }
    }
}

impl<P: Provider> Provider for MockProvider<P> {
    async fn get_value(&self, key: &Key, lock_on_miss: bool) -> Result<ValueLookup> {
        self.record(ProviderOp::GetValue {
            key: key.clone(),
            lock_on_miss,
        })?;
        self.inner.get_value(key, lock_on_miss).await
    }

    async fn get_values(&self, keys: &[Key], lock_on_miss: &[bool]) -> Result<Vec<ValueLookup>> {
        self.record(ProviderOp::GetValues {
            keys: keys.to_vec(),
            lock_on_miss: lock_on_miss.to_vec(),
        })?;
        self.inner.get_values(keys, lock_on_miss).await
    }

    async fn set_value(&self, lock_key: &Key, keys_to_set: &[Key], value: &str, sentinel: &Sentinel, ttl: Duration) -> Result<SetOutcome> {
        self.record(ProviderOp::SetValue {
            lock_key: lock_key.clone(),
            keys: keys_to_set.to_vec(),
            value: value.to_owned(),
            sentinel: sentinel.clone(),
        })?;
        self.inner.set_value(lock_key, keys_to_set, value, sentinel, ttl).await
    }

    async fn delete_value(&self, keys: &[Key], set_tombstone: bool, force: bool) -> Result<()> {
        self.record(ProviderOp::DeleteValue {
            keys: keys.to_vec(),
            set_tombstone,
            force,
        })?;
        self.inner.delete_value(keys, set_tombstone, force).await
    }

    async fn write_sentinel(&self, kind: SentinelType, keys: &[Key]) -> Result<Sentinel> {
        self.record(ProviderOp::WriteSentinel { kind, keys: keys.to_vec() })?;
        self.inner.write_sentinel(kind, keys).await
    }

    async fn release_sentinel(&self, keys: &[Key], sentinel: &Sentinel) {
        let op = ProviderOp::ReleaseSentinel {
            keys: keys.to_vec(),
            sentinel: sentinel.clone(),
        };
        if self.record(op).is_ok() {
            self.inner.release_sentinel(keys, sentinel).await;
        }
    }

    async fn add_dependency(&self, dependency_keys: &[Key], dependent_keys: &[Key], ttl: Duration) -> Result<()> {
        self.record(ProviderOp::AddDependency {
            dependency_keys: dependency_keys.to_vec(),
            dependent_keys: dependent_keys.to_vec(),
        })?;
        self.inner.add_dependency(dependency_keys, dependent_keys, ttl).await
    }

    async fn clear_dependencies(&self, key: &Key, set_tombstone: bool) -> Result<()> {
        self.record(ProviderOp::ClearDependencies {
            key: key.clone(),
            set_tombstone,
        })?;
        self.inner.clear_dependencies(key, set_tombstone).await
    }

    async fn flush(&self, prefix: &str, flush_tombstones: bool) -> Result<()> {
        self.record(ProviderOp::Flush {
            prefix: prefix.to_owned(),
            flush_tombstones,
        })?;
        self.inner.flush(prefix, flush_tombstones).await
    }

    fn cache_name(&self) -> &str {
        self.inner.cache_name()
    }

    async fn register_invalidation_handler(&self, handler: InvalidationHandler, key: &Key) -> Result<()> {
        self.record(ProviderOp::RegisterInvalidationHandler { key: key.clone() })?;
        self.inner.register_invalidation_handler(handler, key).await
    }
}
