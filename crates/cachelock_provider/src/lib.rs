// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Backend abstractions for the `cachelock` consistency layer.
//!
//! This crate defines the vocabulary shared by the lock/save/get/delete algorithms in
//! `cachelock` and the key/value backends that serve them:
//!
//! - [`Key`] - an opaque, namespaced cache key.
//! - [`Sentinel`] and [`SentinelType`] - lock tokens stored in the same slot as cached values.
//! - [`SentinelManager`] - the pure decision logic deciding when a sentinel or a value may be
//!   written over whatever a slot currently holds. [`DefaultSentinelManager`] is the standard
//!   rule set.
//! - [`Provider`] - the backend contract: atomic get/set/delete/lock primitives over keys.
//!
//! # Implementing a Provider
//!
//! A provider owns all shared state. Its `set_value` must be a compare-and-swap against the
//! lock key and its `write_sentinel` must claim every key or none of them. Everything else
//! (expiry, encoding of dependency lists) is up to the backend; see `cachelock_memory` for an
//! in-process implementation and `cachelock_redis` for a networked one.
//!
//! # Sentinels share the value slot
//!
//! A slot holds either a real cached value or a sentinel, never both. This is what lets any
//! plain key/value store act as a provider: a lock is just a distinguished string.
//!
//! ```
//! use cachelock_provider::{DefaultSentinelManager, SentinelManager, SentinelType};
//!
//! let manager = DefaultSentinelManager;
//! let sentinel = manager.generate_sentinel(SentinelType::Create);
//!
//! assert!(manager.is_sentinel_value(sentinel.as_str()));
//! assert!(!manager.is_sentinel_value(r#"{"id":1}"#));
//!
//! // A create lock may be taken on an empty slot, but never over a live delete.
//! let delete = manager.generate_sentinel(SentinelType::Delete);
//! assert!(manager.can_set_sentinel_given_curr_val(None, &sentinel));
//! assert!(!manager.can_set_sentinel_given_curr_val(Some(delete.as_str()), &sentinel));
//! ```

pub mod dependencies;
pub mod error;
mod key;
pub(crate) mod provider;
mod sentinel;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use key::Key;
#[doc(inline)]
pub use provider::{InvalidationHandler, Provider, SetOutcome, ValueLookup};
#[doc(inline)]
pub use sentinel::{DefaultSentinelManager, Sentinel, SentinelManager, SentinelType, SetDecision};
