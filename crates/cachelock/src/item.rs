// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The contract implemented by cacheable entities.

use std::time::Duration;

use cachelock_provider::{Key, SentinelType};
use serde::{Serialize, de::DeserializeOwned};

use crate::{KeyNameProvider, TtlProvider};

/// A cacheable entity.
///
/// An item is cached as JSON under its primary key and every secondary key. The other key
/// roles are optional and default to absent:
///
/// - the **global collection** key names the cached list of all items of the type;
/// - the **per-item collection** key names a cached list this item belongs to;
/// - the **dependencies** key holds the list of keys to invalidate when this item changes;
/// - the **dependency keys** are the dependencies lists of other items this one must be
///   invalidated with;
/// - the **is-modified** key marks the item as changed by another writer.
///
/// # Examples
///
/// ```
/// use cachelock::{Key, KeyNameProvider, SingleItem};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: String,
///     email: String,
/// }
///
/// impl SingleItem for User {
///     const CACHE_ID: &'static str = "USER";
///
///     fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
///         names.key_name_with_string("USER", &self.id)
///     }
///
///     fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
///         vec![names.key_name_with_string("USER_BY_EMAIL", &self.email)]
///     }
/// }
/// ```
pub trait SingleItem: Serialize + DeserializeOwned + Send + Sync {
    /// Identifies the item type in TTL tables.
    const CACHE_ID: &'static str;

    /// Returns the key the item is primarily cached and locked under.
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key;

    /// Returns further keys the item is cached under.
    fn secondary_keys(&self, _names: &dyn KeyNameProvider) -> Vec<Key> {
        Vec::new()
    }

    /// Returns the key of the cached list of every item of this type.
    fn global_collection_key(&self, _names: &dyn KeyNameProvider) -> Option<Key> {
        None
    }

    /// Returns the key of the cached collection this item belongs to.
    fn per_item_collection_key(&self, _names: &dyn KeyNameProvider) -> Option<Key> {
        None
    }

    /// Returns the key of this item's own dependency list.
    fn dependencies_key(&self, _names: &dyn KeyNameProvider) -> Option<Key> {
        None
    }

    /// Returns the dependency lists this item registers itself in.
    fn dependency_keys(&self, _names: &dyn KeyNameProvider) -> Vec<Key> {
        Vec::new()
    }

    /// Returns the key whose presence marks cached copies of this item as untrusted.
    fn is_modified_key(&self, _names: &dyn KeyNameProvider) -> Option<Key> {
        None
    }

    /// Returns how long items of this type stay cached.
    ///
    /// Both the read and the save path consult this, so returning [`SKIP_CACHE_TTL`](crate::SKIP_CACHE_TTL)
    /// disables caching of the type entirely.
    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(Self::CACHE_ID)
    }

    /// Checks a cached copy before it is handed out. Failing copies are purged.
    ///
    /// # Errors
    ///
    /// Returns the reason the item must not be served.
    fn validate(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Every key of one item, resolved once per operation.
#[derive(Debug)]
pub(crate) struct ItemKeys {
    pub(crate) primary: Key,
    pub(crate) secondary: Vec<Key>,
    pub(crate) global_collection: Option<Key>,
    pub(crate) per_item_collection: Option<Key>,
    pub(crate) dependencies: Option<Key>,
    pub(crate) is_modified: Option<Key>,
}

impl ItemKeys {
    pub(crate) fn of<T: SingleItem>(item: &T, names: &dyn KeyNameProvider) -> Self {
        Self {
            primary: item.primary_key(names),
            secondary: item.secondary_keys(names),
            global_collection: item.global_collection_key(names),
            per_item_collection: item.per_item_collection_key(names),
            dependencies: item.dependencies_key(names),
            is_modified: item.is_modified_key(names),
        }
    }

    /// The primary key followed by the secondary keys.
    pub(crate) fn cached(&self) -> Vec<Key> {
        let mut keys = Vec::with_capacity(1 + self.secondary.len());
        keys.push(self.primary.clone());
        keys.extend(self.secondary.iter().cloned());
        keys
    }

    /// The keys a lock of `kind` claims, primary first.
    pub(crate) fn lock_keys(&self, kind: SentinelType) -> Vec<Key> {
        if kind == SentinelType::Read {
            return vec![self.primary.clone()];
        }

        let mut keys = Vec::with_capacity(3 + self.secondary.len());
        keys.push(self.primary.clone());
        keys.extend(self.global_collection.iter().cloned());
        keys.extend(self.secondary.iter().cloned());
        if kind == SentinelType::Delete {
            keys.extend(self.per_item_collection.iter().cloned());
        }
        keys
    }
}
