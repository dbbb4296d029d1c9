// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_URL: &str = "redis://127.0.0.1:6379";

/// Configuration for a [`RedisProvider`](crate::RedisProvider).
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// # Examples
///
/// ```
/// use cachelock_redis::RedisProviderConfig;
/// use std::time::Duration;
///
/// let config = RedisProviderConfig::new("redis://cache.internal:6379")
///     .with_key_prefix("authz")
///     .with_lock_ttl(Duration::from_secs(10));
///
/// assert_eq!(config.namespaced("OBJ_1"), "authz:OBJ_1");
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisProviderConfig {
    /// Connection URL.
    pub url: String,
    /// Prepended, with a `:` separator, to every key the provider touches.
    pub key_prefix: Option<String>,
    /// Name reported by `cache_name` and used in logs.
    pub name: Option<String>,
    /// Lifetime of a sentinel whose holder never releases it.
    pub lock_ttl: Duration,
    /// Lifetime of tombstones.
    pub tombstone_ttl: Duration,
}

impl Default for RedisProviderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            key_prefix: None,
            name: None,
            lock_ttl: Duration::from_secs(30),
            tombstone_ttl: Duration::from_secs(5),
        }
    }
}

impl RedisProviderConfig {
    /// Creates a configuration for the server at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::default().with_url(url)
    }

    /// Sets the connection URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the provider name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the sentinel lifetime.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the tombstone lifetime.
    #[must_use]
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Returns the Redis key for `key`.
    #[must_use]
    pub fn namespaced(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_owned(),
        }
    }

    /// Returns a `SCAN MATCH` pattern selecting every key starting with `prefix`.
    pub(crate) fn scan_pattern(&self, prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for c in self.namespaced(prefix).chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RedisProviderConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.tombstone_ttl, Duration::from_secs(5));
        assert_eq!(config.namespaced("k"), "k");
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: RedisProviderConfig =
            serde_json::from_str(r#"{"url":"redis://other:6380","key_prefix":"svc","lock_ttl":{"secs":3,"nanos":0}}"#)
                .expect("valid config");
        assert_eq!(config.url, "redis://other:6380");
        assert_eq!(config.key_prefix.as_deref(), Some("svc"));
        assert_eq!(config.lock_ttl, Duration::from_secs(3));
        assert_eq!(config.tombstone_ttl, Duration::from_secs(5));
    }

    #[test]
    fn scan_pattern_escapes_glob_characters() {
        let config = RedisProviderConfig::default().with_key_prefix("a*b");
        assert_eq!(config.scan_pattern("ns[1]"), r"a\*b:ns\[1\]*");
    }
}
