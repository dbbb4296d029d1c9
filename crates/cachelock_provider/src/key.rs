// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// An opaque, namespaced cache key.
///
/// Keys are produced by a key-name provider and are never parsed by the consistency layer;
/// two keys are the same slot exactly when their strings are equal.
///
/// # Examples
///
/// ```
/// use cachelock_provider::Key;
///
/// let key = Key::from("tenant:OBJ_42");
/// assert_eq!(key.as_str(), "tenant:OBJ_42");
/// assert!(key.starts_with("tenant:"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Creates a key from any string-like value.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the key starts with the given namespace prefix.
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Returns `true` for the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the key and returns the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn display_matches_inner_string() {
        let key = Key::new("ns:EDGE_1");
        assert_eq!(key.to_string(), "ns:EDGE_1");
    }

    #[test]
    fn borrow_allows_str_lookups() {
        let mut set = HashSet::new();
        set.insert(Key::from("a"));
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Key::from("k1")).expect("serialize");
        assert_eq!(json, r#""k1""#);

        let key: Key = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(key, Key::from("k1"));
    }
}
