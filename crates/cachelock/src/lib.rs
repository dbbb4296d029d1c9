// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Read-after-write consistent caching over a plain key/value store.
//!
//! Many request handlers share one cache in front of an authoritative store. This crate keeps
//! them from caching stale data without any transaction support in the cache backend:
//!
//! - **Sentinels.** Before touching the authoritative store, a writer claims the item's keys
//!   by writing a lock token into their value slots with [`take_item_lock`]. A save only lands
//!   if the slot still holds the writer's token, so a reader that loaded an old row cannot
//!   overwrite a newer write.
//! - **Dependencies.** Items and collections register themselves in the dependency lists of
//!   what they were derived from; changing or deleting an item invalidates every registered
//!   dependent.
//! - **Tombstones.** Deletes leave short-lived markers that keep racing readers from
//!   repopulating a key or re-registering a dependency on it.
//!
//! Everything that can go wrong in the cache degrades to "not cached": reads turn into misses
//! and saves are skipped. Only lock acquisition reports a retryable [`Error::LockConflict`].
//!
//! # Lifecycle
//!
//! ```
//! use cachelock::{
//!     CacheContext, InMemoryProvider, Key, KeyNameProvider, KeyNames, Manager, SaveOutcome, SentinelType, SingleItem, Ttls,
//!     delete_item_from_cache, get_item_from_cache, release_item_lock, save_item_to_cache, take_item_lock,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct User {
//!     id: String,
//!     name: String,
//! }
//!
//! impl SingleItem for User {
//!     const CACHE_ID: &'static str = "USER";
//!
//!     fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
//!         names.key_name_with_string("USER", &self.id)
//!     }
//! }
//!
//! # futures::executor::block_on(async {
//! let ctx = CacheContext::default();
//! let manager = Manager::new(InMemoryProvider::new(), KeyNames::new("app"), Ttls::new(Duration::from_secs(60)));
//! let user = User { id: "1".into(), name: "Ada".into() };
//!
//! // Declare the update, write the authoritative store, then cache the new state.
//! let sentinel = take_item_lock(&ctx, SentinelType::Update, &manager, &user).await?;
//! assert_eq!(save_item_to_cache(&ctx, &manager, &user, &sentinel, true, &[]).await, SaveOutcome::Stored);
//! release_item_lock(&ctx, SentinelType::Update, &manager, &user, &sentinel).await;
//!
//! let key = user.primary_key(manager.names());
//! let cached = get_item_from_cache::<_, User>(&ctx, &manager, &key, false).await;
//! assert_eq!(cached.item.as_ref(), Some(&user));
//!
//! // Deleting tombstones the item; nothing can re-cache it until the tombstone expires.
//! let sentinel = take_item_lock(&ctx, SentinelType::Delete, &manager, &user).await?;
//! delete_item_from_cache(&ctx, &manager, &user, &sentinel).await?;
//! let gone = get_item_from_cache::<_, User>(&ctx, &manager, &key, true).await;
//! assert!(gone.item.is_none());
//! assert!(gone.sentinel.is_no_lock());
//! # Ok::<(), cachelock::Error>(())
//! # });
//! ```

mod delete;
mod error;
mod get;
mod item;
mod lock;
mod manager;
mod metrics;
mod names;
mod save;
mod ttl;

#[cfg(feature = "memory")]
#[doc(inline)]
pub use cachelock_memory::InMemoryProvider;
#[doc(inline)]
pub use cachelock_provider::{Key, Provider, Sentinel, SentinelType};
pub use delete::delete_item_from_cache;
pub use error::{Error, Result};
pub use get::{Lookup, get_item_from_cache, get_item_from_cache_with_modified_key, get_items_array_from_cache, get_items_from_cache};
pub use item::SingleItem;
pub use lock::{release_item_lock, release_per_item_collection_lock, take_item_lock, take_per_item_collection_lock};
pub use manager::Manager;
pub use metrics::{CacheContext, CacheMetrics, get_metrics, init_context, reset_context};
pub use names::{KeyNameProvider, KeyNames};
pub use save::{MAX_COLLECTION_DEPENDENCIES, SaveOutcome, save_item_to_cache, save_items_from_collection_to_cache, save_items_to_collection};
pub use ttl::{SKIP_CACHE_TTL, TtlProvider, Ttls};
