// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Encoding of dependency lists.
//!
//! A dependency list lives in an ordinary string slot as a JSON array of keys, so providers
//! need nothing beyond get/set to store one.

use std::collections::BTreeSet;

use crate::{Error, Key, Result};

/// Decodes the dependency list stored at `key`.
///
/// # Errors
///
/// Returns [`Error::Corrupt`] if `raw` is not a JSON array of strings.
pub fn decode(key: &Key, raw: &str) -> Result<BTreeSet<Key>> {
    serde_json::from_str(raw).map_err(|source| Error::Corrupt { key: key.clone(), source })
}

/// Encodes a dependency list for storage.
///
/// # Errors
///
/// Returns [`Error::Backend`] if serialization fails.
pub fn encode(keys: &BTreeSet<Key>) -> Result<String> {
    serde_json::to_string(keys).map_err(Error::backend)
}

/// Merges `dependents` into the list stored in `existing` and returns the encoded result.
///
/// # Errors
///
/// Returns [`Error::Corrupt`] if `existing` does not decode.
pub fn merge(key: &Key, existing: Option<&str>, dependents: &[Key]) -> Result<String> {
    let mut keys = match existing {
        Some(raw) => decode(key, raw)?,
        None => BTreeSet::new(),
    };
    keys.extend(dependents.iter().cloned());
    encode(&keys)
}
