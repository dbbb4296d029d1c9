// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory provider implementation.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use cachelock_provider::{
    Error, InvalidationHandler, Key, Provider, Result, Sentinel, SentinelManager, SentinelType, SetOutcome, ValueLookup, dependencies,
};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::builder::InMemoryProviderBuilder;

const DEFAULT_NAME: &str = "in-memory";

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// The slot map. Every read of it goes through [`Slots::live`] so expired slots read as empty.
#[derive(Debug, Default)]
struct Slots(HashMap<Key, Slot>);

impl Slots {
    fn live(&self, key: &Key, now: Instant) -> Option<&str> {
        self.0.get(key).filter(|slot| slot.is_live(now)).map(|slot| slot.value.as_str())
    }

    fn live_owned(&self, key: &Key, now: Instant) -> Option<String> {
        self.live(key, now).map(str::to_owned)
    }

    /// Writes `value`; a zero `ttl` never expires.
    fn put(&mut self, key: &Key, value: impl Into<String>, ttl: Duration, now: Instant) {
        let expires_at = (!ttl.is_zero()).then(|| now + ttl);
        self.0.insert(
            key.clone(),
            Slot {
                value: value.into(),
                expires_at,
            },
        );
    }

    fn remove(&mut self, key: &Key) {
        self.0.remove(key);
    }
}

struct Inner {
    name: String,
    lock_ttl: Duration,
    tombstone_ttl: Duration,
    sentinels: Arc<dyn SentinelManager>,
    slots: Mutex<Slots>,
    handlers: Mutex<HashMap<Key, Vec<InvalidationHandler>>>,
}

/// An in-process [`Provider`].
///
/// Clones share the same slots, so one provider can back every request handler of a process.
///
/// # Examples
///
/// ```
/// use cachelock_memory::InMemoryProvider;
/// use cachelock_provider::{Key, Provider};
/// # futures::executor::block_on(async {
///
/// let provider = InMemoryProvider::new();
/// let lookup = provider.get_value(&Key::from("missing"), true).await?;
///
/// // A miss with lock-on-miss hands out a read lock.
/// assert!(lookup.value.is_none());
/// assert!(!lookup.sentinel.is_no_lock());
/// # Ok::<(), cachelock_provider::Error>(())
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryProvider {
    inner: Arc<Inner>,
}

impl fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("name", &self.inner.name)
            .field("lock_ttl", &self.inner.lock_ttl)
            .field("tombstone_ttl", &self.inner.tombstone_ttl)
            .field("sentinels", &self.inner.sentinels)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Creates a provider with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring a provider.
    #[must_use]
    pub fn builder() -> InMemoryProviderBuilder {
        InMemoryProviderBuilder::new()
    }

    pub(crate) fn from_builder(mut builder: InMemoryProviderBuilder) -> Self {
        let sentinels = builder.take_sentinel_manager();
        Self {
            inner: Arc::new(Inner {
                name: builder.name.unwrap_or_else(|| DEFAULT_NAME.to_owned()),
                lock_ttl: builder.lock_ttl,
                tombstone_ttl: builder.tombstone_ttl,
                sentinels,
                slots: Mutex::new(Slots::default()),
                handlers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the raw content of a slot, sentinel or value, if it is live.
    #[must_use]
    pub fn peek(&self, key: &Key) -> Option<String> {
        self.inner.slots.lock().live_owned(key, Instant::now())
    }

    /// Returns the number of live slots.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        let now = Instant::now();
        self.inner.slots.lock().0.values().filter(|slot| slot.is_live(now)).count()
    }

    /// Logs every live slot under `prefix` at debug level.
    pub fn log_key_values(&self, prefix: &str) {
        let now = Instant::now();
        let slots = self.inner.slots.lock();
        for (key, slot) in slots.0.iter().filter(|(key, slot)| key.starts_with(prefix) && slot.is_live(now)) {
            tracing::debug!(cache.name = %self.inner.name, cache.key = %key, cache.value = %slot.value, "cache.slot");
        }
    }

    fn lookup(&self, slots: &mut Slots, key: &Key, lock_on_miss: bool, now: Instant) -> ValueLookup {
        match slots.live_owned(key, now) {
            Some(raw) if self.inner.sentinels.is_sentinel_value(&raw) => ValueLookup {
                conflict: Some(raw),
                ..ValueLookup::default()
            },
            Some(raw) => ValueLookup::hit(raw),
            None if lock_on_miss => {
                let sentinel = self.inner.sentinels.generate_sentinel(SentinelType::Read);
                slots.put(key, sentinel.as_str(), self.inner.lock_ttl, now);
                ValueLookup {
                    sentinel,
                    ..ValueLookup::default()
                }
            }
            None => ValueLookup::default(),
        }
    }

    fn notify(&self, keys: &[Key]) {
        let handlers: Vec<(Key, InvalidationHandler)> = {
            let registered = self.inner.handlers.lock();
            if registered.is_empty() {
                return;
            }
            keys.iter()
                .filter_map(|key| registered.get(key).map(|handlers| (key, handlers)))
                .flat_map(|(key, handlers)| handlers.iter().map(move |handler| (key.clone(), Arc::clone(handler))))
                .collect()
        };

        for (key, handler) in handlers {
            handler(&key);
        }
    }
}

impl Provider for InMemoryProvider {
    async fn get_value(&self, key: &Key, lock_on_miss: bool) -> Result<ValueLookup> {
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        Ok(self.lookup(&mut slots, key, lock_on_miss, now))
    }

    async fn get_values(&self, keys: &[Key], lock_on_miss: &[bool]) -> Result<Vec<ValueLookup>> {
        if keys.len() != lock_on_miss.len() {
            return Err(Error::InvalidArgument(format!(
                "{} keys but {} lock-on-miss flags",
                keys.len(),
                lock_on_miss.len()
            )));
        }

        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        Ok(keys
            .iter()
            .zip(lock_on_miss)
            .map(|(key, &lock)| self.lookup(&mut slots, key, lock, now))
            .collect())
    }

    async fn set_value(&self, lock_key: &Key, keys_to_set: &[Key], value: &str, sentinel: &Sentinel, ttl: Duration) -> Result<SetOutcome> {
        if sentinel.is_no_lock() {
            return Ok(SetOutcome::default());
        }

        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        let current = slots.live_owned(lock_key, now);
        let decision = self.inner.sentinels.can_set_value(current.as_deref(), value, sentinel);

        if decision.set {
            for key in keys_to_set {
                slots.put(key, value, ttl, now);
            }
        } else if decision.clear {
            slots.remove(lock_key);
        }

        if decision.conflict {
            tracing::debug!(
                cache.name = %self.inner.name,
                cache.key = %lock_key,
                cache.sentinel = %sentinel,
                cache.refresh = decision.refresh,
                "cache.set_conflict"
            );
        }

        Ok(SetOutcome {
            stored: decision.set,
            conflict: decision.conflict,
        })
    }

    async fn delete_value(&self, keys: &[Key], set_tombstone: bool, force: bool) -> Result<()> {
        let now = Instant::now();
        let mut deleted = Vec::with_capacity(keys.len());
        {
            let mut slots = self.inner.slots.lock();
            for key in keys {
                let locked = slots.live(key, now).is_some_and(|raw| self.inner.sentinels.is_sentinel_value(raw));
                if locked && !force {
                    continue;
                }
                if set_tombstone {
                    slots.put(key, Sentinel::TOMBSTONE.as_str(), self.inner.tombstone_ttl, now);
                } else {
                    slots.remove(key);
                }
                deleted.push(key.clone());
            }
        }

        self.notify(&deleted);
        Ok(())
    }

    async fn write_sentinel(&self, kind: SentinelType, keys: &[Key]) -> Result<Sentinel> {
        if keys.is_empty() {
            return Ok(Sentinel::NO_LOCK);
        }

        let sentinels = &self.inner.sentinels;
        let sentinel = sentinels.generate_sentinel(kind);
        let always = sentinels.can_always_set_sentinel(&sentinel);

        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        let mut acquired = true;
        let mut markers = Vec::new();
        for key in keys {
            let current = slots.live(key, now);
            if always || sentinels.can_set_sentinel_given_curr_val(current, &sentinel) {
                continue;
            }
            acquired = false;
            if let Some(marker) = sentinels.conflict_sentinel(current, &sentinel) {
                markers.push((key, marker));
            }
        }

        if acquired {
            for key in keys {
                slots.put(key, sentinel.as_str(), self.inner.lock_ttl, now);
            }
            return Ok(sentinel);
        }

        for (key, marker) in markers {
            slots.put(key, marker.as_str(), self.inner.lock_ttl, now);
        }
        tracing::debug!(cache.name = %self.inner.name, cache.kind = %kind, cache.keys = ?keys, "cache.lock_contended");
        Ok(Sentinel::NO_LOCK)
    }

    async fn release_sentinel(&self, keys: &[Key], sentinel: &Sentinel) {
        if sentinel.is_no_lock() {
            return;
        }

        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        for key in keys {
            if slots.live(key, now) == Some(sentinel.as_str()) {
                slots.remove(key);
            }
        }
    }

    async fn add_dependency(&self, dependency_keys: &[Key], dependent_keys: &[Key], ttl: Duration) -> Result<()> {
        let sentinels = &self.inner.sentinels;
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();

        if let Some(key) = dependency_keys
            .iter()
            .find(|key| slots.live(key, now).is_some_and(|raw| sentinels.is_tombstone(raw)))
        {
            return Err(Error::Tombstoned(key.clone()));
        }

        // Encode everything before writing anything, so a corrupt list leaves no partial update.
        let mut updates = Vec::with_capacity(dependency_keys.len());
        for key in dependency_keys {
            let existing = slots.live(key, now).filter(|raw| !sentinels.is_sentinel_value(raw));
            let merged = dependencies::merge(key, existing, dependent_keys)?;
            let expires_at = slots.0.get(key).and_then(|slot| slot.expires_at);
            updates.push((key, merged, expires_at));
        }

        for (key, merged, expires_at) in updates {
            let wanted = now + ttl;
            let ttl = match expires_at {
                Some(at) if at > wanted => at - now,
                _ => ttl,
            };
            slots.put(key, merged, ttl, now);
        }
        Ok(())
    }

    async fn clear_dependencies(&self, key: &Key, set_tombstone: bool) -> Result<()> {
        let sentinels = &self.inner.sentinels;
        let now = Instant::now();
        let mut invalidated = Vec::new();

        let decoded = {
            let mut slots = self.inner.slots.lock();
            let decoded = match slots.live(key, now) {
                Some(raw) if !sentinels.is_sentinel_value(raw) => dependencies::decode(key, raw),
                _ => Ok(Default::default()),
            };

            if let Ok(listed) = &decoded {
                for dependent in listed {
                    if set_tombstone {
                        slots.put(dependent, Sentinel::TOMBSTONE.as_str(), self.inner.tombstone_ttl, now);
                    } else {
                        slots.remove(dependent);
                    }
                    invalidated.push(dependent.clone());
                }
            }

            if set_tombstone {
                slots.put(key, Sentinel::TOMBSTONE.as_str(), self.inner.tombstone_ttl, now);
            } else {
                slots.remove(key);
            }
            invalidated.push(key.clone());
            decoded
        };

        self.notify(&invalidated);
        if let Err(error) = &decoded {
            tracing::warn!(cache.name = %self.inner.name, cache.key = %key, error = %error, "cache.dependencies_corrupt");
        }
        decoded.map(|_| ())
    }

    async fn flush(&self, prefix: &str, flush_tombstones: bool) -> Result<()> {
        let sentinels = &self.inner.sentinels;
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        slots.0.retain(|key, slot| {
            if !slot.is_live(now) {
                return false;
            }
            !key.starts_with(prefix) || (!flush_tombstones && sentinels.is_tombstone(&slot.value))
        });
        Ok(())
    }

    fn cache_name(&self) -> &str {
        &self.inner.name
    }

    async fn register_invalidation_handler(&self, handler: InvalidationHandler, key: &Key) -> Result<()> {
        self.inner.handlers.lock().entry(key.clone()).or_default().push(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        tokio::time::pause();
        let provider = InMemoryProvider::new();
        let key = Key::from("k");
        let sentinel = provider.write_sentinel(SentinelType::Create, &[key.clone()]).await.expect("lock");
        provider
            .set_value(&key, &[key.clone()], "v", &sentinel, Duration::ZERO)
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(provider.peek(&key).as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn abandoned_lock_expires() {
        tokio::time::pause();
        let provider = InMemoryProvider::builder().lock_ttl(Duration::from_secs(1)).build();
        let key = Key::from("k");
        let first = provider.write_sentinel(SentinelType::Create, &[key.clone()]).await.expect("lock");
        assert!(!first.is_no_lock());

        let blocked = provider.write_sentinel(SentinelType::Create, &[key.clone()]).await.expect("lock");
        assert!(blocked.is_no_lock());

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = provider.write_sentinel(SentinelType::Create, &[key.clone()]).await.expect("lock");
        assert!(!second.is_no_lock());
    }

    #[tokio::test]
    async fn get_values_rejects_mismatched_flags() {
        let provider = InMemoryProvider::new();
        let err = provider
            .get_values(&[Key::from("a"), Key::from("b")], &[true])
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn debug_reports_configuration() {
        let provider = InMemoryProvider::builder().name("dbg").build();
        let debug = format!("{provider:?}");
        assert!(debug.contains("dbg"));
        assert!(debug.contains("lock_ttl"));
    }
}
