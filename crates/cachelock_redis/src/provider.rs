// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt, slice, sync::Arc, time::Duration};

use cachelock_provider::{
    DefaultSentinelManager, Error, InvalidationHandler, Key, Provider, Result, Sentinel, SentinelManager, SentinelType, SetOutcome,
    ValueLookup, dependencies,
};
use redis::{
    Client, Pipeline,
    aio::{ConnectionManager, MultiplexedConnection},
};

use crate::RedisProviderConfig;

const DEFAULT_NAME: &str = "redis";

/// Optimistic transactions touching shared dependency lists are retried this many times.
const MAX_TRANSACTION_ATTEMPTS: usize = 8;

const SCAN_BATCH: usize = 100;

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn contended(operation: &'static str) -> Error {
    Error::backend(format!("{operation}: transaction aborted {MAX_TRANSACTION_ATTEMPTS} times by concurrent writers"))
}

/// A `MULTI`/`EXEC` block committed against keys watched on the same connection.
struct Transaction {
    pipe: Pipeline,
    writes: usize,
}

impl Transaction {
    fn new() -> Self {
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self { pipe, writes: 0 }
    }

    /// Queues a write; a zero `ttl` never expires.
    fn put(&mut self, key: &str, value: &str, ttl: Duration) {
        if ttl.is_zero() {
            self.pipe.cmd("SET").arg(key).arg(value).ignore();
        } else {
            self.pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(millis(ttl)).ignore();
        }
        self.writes += 1;
    }

    fn del(&mut self, key: &str) {
        self.pipe.cmd("DEL").arg(key).ignore();
        self.writes += 1;
    }

    /// Returns `false` if a watched key changed and nothing was written.
    async fn commit(&self, conn: &mut MultiplexedConnection) -> Result<bool> {
        if self.writes == 0 {
            let _: () = redis::cmd("UNWATCH").query_async(conn).await.map_err(Error::backend)?;
            return Ok(true);
        }
        let committed: Option<()> = self.pipe.query_async(conn).await.map_err(Error::backend)?;
        Ok(committed.is_some())
    }
}

/// Watches `keys` and returns their current contents.
async fn watch(conn: &mut MultiplexedConnection, keys: &[String]) -> Result<Vec<Option<String>>> {
    let _: () = redis::cmd("WATCH").arg(keys).query_async(conn).await.map_err(Error::backend)?;
    let current: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(conn).await.map_err(Error::backend)?;
    Ok(current)
}

/// A [`Provider`] backed by Redis.
///
/// Plain reads go through a shared, auto-reconnecting connection. Every operation whose
/// correctness depends on what a slot currently holds runs as an optimistic transaction
/// (`WATCH`, read, decide, `MULTI`/`EXEC`) on a connection of its own, with the decision taken
/// by the configured [`SentinelManager`].
///
/// Invalidation handlers are not supported.
///
/// # Examples
///
/// ```no_run
/// use cachelock_provider::{Key, Provider};
/// use cachelock_redis::{RedisProvider, RedisProviderConfig};
///
/// # async fn example() -> cachelock_provider::Result<()> {
/// let provider = RedisProvider::connect(RedisProviderConfig::new("redis://127.0.0.1:6379").with_key_prefix("authz")).await?;
/// let lookup = provider.get_value(&Key::from("authz:OBJ_1"), true).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisProvider {
    client: Client,
    connection: ConnectionManager,
    config: Arc<RedisProviderConfig>,
    name: Arc<str>,
    sentinels: Arc<dyn SentinelManager>,
}

impl fmt::Debug for RedisProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisProvider")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .field("sentinels", &self.sentinels)
            .finish_non_exhaustive()
    }
}

impl RedisProvider {
    /// Connects to the server named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the URL is invalid or the server is unreachable.
    pub async fn connect(config: RedisProviderConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(Error::backend)?;
        let connection = ConnectionManager::new(client.clone()).await.map_err(Error::backend)?;
        let name: Arc<str> = Arc::from(config.name.as_deref().unwrap_or(DEFAULT_NAME));

        tracing::debug!(cache.name = %name, cache.url = %config.url, "cache.connected");
        Ok(Self {
            client,
            connection,
            config: Arc::new(config),
            name,
            sentinels: Arc::new(DefaultSentinelManager),
        })
    }

    /// Replaces the sentinel rules.
    #[must_use]
    pub fn with_sentinel_manager(mut self, manager: impl SentinelManager + 'static) -> Self {
        self.sentinels = Arc::new(manager);
        self
    }

    /// Returns the configuration the provider was created with.
    #[must_use]
    pub fn config(&self) -> &RedisProviderConfig {
        &self.config
    }

    fn redis_key(&self, key: &Key) -> String {
        self.config.namespaced(key.as_str())
    }

    fn redis_keys(&self, keys: &[Key]) -> Vec<String> {
        keys.iter().map(|key| self.redis_key(key)).collect()
    }

    async fn dedicated(&self) -> Result<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(Error::backend)
    }

    fn invalidate(&self, tx: &mut Transaction, target: &str, set_tombstone: bool) {
        if set_tombstone {
            tx.put(target, Sentinel::TOMBSTONE.as_str(), self.config.tombstone_ttl);
        } else {
            tx.del(target);
        }
    }

    fn observed(&self, raw: Option<String>) -> ValueLookup {
        match raw {
            Some(raw) if self.sentinels.is_sentinel_value(&raw) => ValueLookup {
                conflict: Some(raw),
                ..ValueLookup::default()
            },
            Some(raw) => ValueLookup::hit(raw),
            None => ValueLookup::default(),
        }
    }

    async fn resolve(&self, conn: &mut ConnectionManager, target: &str, raw: Option<String>, lock_on_miss: bool) -> Result<ValueLookup> {
        if raw.is_some() || !lock_on_miss {
            return Ok(self.observed(raw));
        }

        let sentinel = self.sentinels.generate_sentinel(SentinelType::Read);
        let acquired: Option<String> = redis::cmd("SET")
            .arg(target)
            .arg(sentinel.as_str())
            .arg("NX")
            .arg("PX")
            .arg(millis(self.config.lock_ttl))
            .query_async(conn)
            .await
            .map_err(Error::backend)?;
        if acquired.is_some() {
            return Ok(ValueLookup {
                sentinel,
                ..ValueLookup::default()
            });
        }

        // Another reader or writer filled the slot between the two commands.
        let raw: Option<String> = redis::cmd("GET").arg(target).query_async(conn).await.map_err(Error::backend)?;
        Ok(self.observed(raw))
    }

    async fn try_release(&self, keys: &[Key], sentinel: &Sentinel) -> Result<()> {
        let targets = self.redis_keys(keys);
        let mut conn = self.dedicated().await?;
        for _ in 0..MAX_TRANSACTION_ATTEMPTS {
            let current = watch(&mut conn, &targets).await?;
            let mut tx = Transaction::new();
            for (target, raw) in targets.iter().zip(&current) {
                if raw.as_deref() == Some(sentinel.as_str()) {
                    tx.del(target);
                }
            }
            if tx.commit(&mut conn).await? {
                return Ok(());
            }
        }
        Err(contended("release_sentinel"))
    }
}

impl Provider for RedisProvider {
    async fn get_value(&self, key: &Key, lock_on_miss: bool) -> Result<ValueLookup> {
        let target = self.redis_key(key);
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET").arg(&target).query_async(&mut conn).await.map_err(Error::backend)?;
        self.resolve(&mut conn, &target, raw, lock_on_miss).await
    }

    async fn get_values(&self, keys: &[Key], lock_on_miss: &[bool]) -> Result<Vec<ValueLookup>> {
        if keys.len() != lock_on_miss.len() {
            return Err(Error::InvalidArgument(format!(
                "{} keys but {} lock-on-miss flags",
                keys.len(),
                lock_on_miss.len()
            )));
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let targets = self.redis_keys(keys);
        let mut conn = self.connection.clone();
        let current: Vec<Option<String>> = redis::cmd("MGET").arg(&targets).query_async(&mut conn).await.map_err(Error::backend)?;

        let mut lookups = Vec::with_capacity(keys.len());
        for ((target, raw), &lock) in targets.iter().zip(current).zip(lock_on_miss) {
            lookups.push(self.resolve(&mut conn, target, raw, lock).await?);
        }
        Ok(lookups)
    }

    async fn set_value(&self, lock_key: &Key, keys_to_set: &[Key], value: &str, sentinel: &Sentinel, ttl: Duration) -> Result<SetOutcome> {
        if sentinel.is_no_lock() {
            return Ok(SetOutcome::default());
        }

        let lock = self.redis_key(lock_key);
        let mut conn = self.dedicated().await?;
        let current = watch(&mut conn, slice::from_ref(&lock)).await?.pop().flatten();
        let decision = self.sentinels.can_set_value(current.as_deref(), value, sentinel);

        let mut tx = Transaction::new();
        if decision.set {
            for target in self.redis_keys(keys_to_set) {
                tx.put(&target, value, ttl);
            }
        } else if decision.clear {
            tx.del(&lock);
        }

        if !tx.commit(&mut conn).await? {
            tracing::debug!(cache.name = %self.name, cache.key = %lock_key, "cache.set_aborted");
            return Ok(SetOutcome {
                stored: false,
                conflict: true,
            });
        }

        if decision.conflict {
            tracing::debug!(
                cache.name = %self.name,
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
        if keys.is_empty() {
            return Ok(());
        }

        let targets = self.redis_keys(keys);
        let mut conn = self.dedicated().await?;
        for _ in 0..MAX_TRANSACTION_ATTEMPTS {
            let current = if force { vec![None; targets.len()] } else { watch(&mut conn, &targets).await? };

            let mut tx = Transaction::new();
            for (target, raw) in targets.iter().zip(&current) {
                if raw.as_deref().is_some_and(|raw| self.sentinels.is_sentinel_value(raw)) {
                    continue;
                }
                self.invalidate(&mut tx, target, set_tombstone);
            }
            if tx.commit(&mut conn).await? {
                return Ok(());
            }
        }
        Err(contended("delete_value"))
    }

    async fn write_sentinel(&self, kind: SentinelType, keys: &[Key]) -> Result<Sentinel> {
        if keys.is_empty() {
            return Ok(Sentinel::NO_LOCK);
        }

        let sentinels = &self.sentinels;
        let sentinel = sentinels.generate_sentinel(kind);
        let always = sentinels.can_always_set_sentinel(&sentinel);
        let lock_ttl = self.config.lock_ttl;

        let targets = self.redis_keys(keys);
        let mut conn = self.dedicated().await?;
        let current = watch(&mut conn, &targets).await?;

        let mut tx = Transaction::new();
        let mut acquired = true;
        for (target, raw) in targets.iter().zip(&current) {
            let raw = raw.as_deref();
            if always || sentinels.can_set_sentinel_given_curr_val(raw, &sentinel) {
                continue;
            }
            acquired = false;
            if let Some(marker) = sentinels.conflict_sentinel(raw, &sentinel) {
                tx.put(target, marker.as_str(), lock_ttl);
            }
        }

        if acquired {
            for target in &targets {
                tx.put(target, sentinel.as_str(), lock_ttl);
            }
        }

        if tx.commit(&mut conn).await? && acquired {
            return Ok(sentinel);
        }
        tracing::debug!(cache.name = %self.name, cache.kind = %kind, cache.keys = ?keys, "cache.lock_contended");
        Ok(Sentinel::NO_LOCK)
    }

    async fn release_sentinel(&self, keys: &[Key], sentinel: &Sentinel) {
        if sentinel.is_no_lock() || keys.is_empty() {
            return;
        }
        if let Err(error) = self.try_release(keys, sentinel).await {
            tracing::warn!(cache.name = %self.name, cache.keys = ?keys, error = %error, "cache.release_failed");
        }
    }

    async fn add_dependency(&self, dependency_keys: &[Key], dependent_keys: &[Key], ttl: Duration) -> Result<()> {
        if dependency_keys.is_empty() {
            return Ok(());
        }

        let targets = self.redis_keys(dependency_keys);
        let mut conn = self.dedicated().await?;
        for _ in 0..MAX_TRANSACTION_ATTEMPTS {
            let current = watch(&mut conn, &targets).await?;
            if let Some((key, _)) = dependency_keys
                .iter()
                .zip(&current)
                .find(|(_, raw)| raw.as_deref().is_some_and(|raw| self.sentinels.is_tombstone(raw)))
            {
                return Err(Error::Tombstoned(key.clone()));
            }

            let mut ttl_query = redis::pipe();
            for target in &targets {
                ttl_query.cmd("PTTL").arg(target);
            }
            let remaining: Vec<i64> = ttl_query.query_async(&mut conn).await.map_err(Error::backend)?;

            let mut tx = Transaction::new();
            for ((key, target), (raw, remaining)) in dependency_keys.iter().zip(&targets).zip(current.iter().zip(remaining)) {
                let existing = raw.as_deref().filter(|raw| !self.sentinels.is_sentinel_value(raw));
                let merged = dependencies::merge(key, existing, dependent_keys)?;
                let ttl = match u64::try_from(remaining).map(Duration::from_millis) {
                    Ok(left) if left > ttl => left,
                    _ => ttl,
                };
                tx.put(target, &merged, ttl);
            }
            if tx.commit(&mut conn).await? {
                return Ok(());
            }
        }
        Err(contended("add_dependency"))
    }

    async fn clear_dependencies(&self, key: &Key, set_tombstone: bool) -> Result<()> {
        let target = self.redis_key(key);
        let mut conn = self.dedicated().await?;
        for _ in 0..MAX_TRANSACTION_ATTEMPTS {
            let raw = watch(&mut conn, slice::from_ref(&target)).await?.pop().flatten();
            let decoded = match raw.as_deref() {
                Some(raw) if !self.sentinels.is_sentinel_value(raw) => dependencies::decode(key, raw),
                _ => Ok(Default::default()),
            };

            let mut tx = Transaction::new();
            if let Ok(listed) = &decoded {
                for dependent in listed {
                    self.invalidate(&mut tx, &self.redis_key(dependent), set_tombstone);
                }
            }
            self.invalidate(&mut tx, &target, set_tombstone);

            if tx.commit(&mut conn).await? {
                if let Err(error) = &decoded {
                    tracing::warn!(cache.name = %self.name, cache.key = %key, error = %error, "cache.dependencies_corrupt");
                }
                return decoded.map(|_| ());
            }
        }
        Err(contended("clear_dependencies"))
    }

    async fn flush(&self, prefix: &str, flush_tombstones: bool) -> Result<()> {
        let pattern = self.config.scan_pattern(prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(Error::backend)?;

            let victims = if flush_tombstones || batch.is_empty() {
                batch
            } else {
                let current: Vec<Option<String>> = redis::cmd("MGET").arg(&batch).query_async(&mut conn).await.map_err(Error::backend)?;
                batch
                    .into_iter()
                    .zip(current)
                    .filter(|(_, raw)| !raw.as_deref().is_some_and(|raw| self.sentinels.is_tombstone(raw)))
                    .map(|(target, _)| target)
                    .collect()
            };

            if !victims.is_empty() {
                let _: () = redis::cmd("DEL").arg(&victims).query_async(&mut conn).await.map_err(Error::backend)?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }

    fn cache_name(&self) -> &str {
        &self.name
    }

    async fn register_invalidation_handler(&self, _handler: InvalidationHandler, _key: &Key) -> Result<()> {
        Err(Error::Unsupported("register_invalidation_handler"))
    }
}
