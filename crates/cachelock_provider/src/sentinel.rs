// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lock tokens and the rules for overwriting them.

use std::{borrow::Cow, fmt};

use uuid::Uuid;

const SENTINEL_PREFIX: &str = "__sentinel__";
const CONFLICT_TAG: &str = "conflict";

/// The kind of operation a sentinel declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SentinelType {
    /// A new item is being written to the authoritative store.
    Create,
    /// An existing item is being modified.
    Update,
    /// An item is being removed. Delete locks always acquire.
    Delete,
    /// A reader missed and is filling the slot from the authoritative store.
    Read,
}

impl SentinelType {
    /// Returns the tag used for this kind inside sentinel tokens.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

impl fmt::Display for SentinelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque lock token stored in a value slot.
///
/// [`Sentinel::NO_LOCK`] is returned whenever a lock could not be (or was never) taken;
/// every save and delete is a no-op when handed it.
///
/// # Examples
///
/// ```
/// use cachelock_provider::Sentinel;
///
/// assert!(Sentinel::NO_LOCK.is_no_lock());
/// assert!(Sentinel::default().is_no_lock());
/// assert!(!Sentinel::TOMBSTONE.is_no_lock());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sentinel(Cow<'static, str>);

impl Sentinel {
    /// The token meaning "no lock is held".
    pub const NO_LOCK: Self = Self(Cow::Borrowed(""));

    /// The marker left behind by tombstoning deletes.
    pub const TOMBSTONE: Self = Self(Cow::Borrowed("__sentinel__tombstone"));

    /// Wraps a raw token, typically one read back from a backend.
    #[must_use]
    pub fn new(token: impl Into<Cow<'static, str>>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for [`Sentinel::NO_LOCK`].
    #[must_use]
    pub fn is_no_lock(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::NO_LOCK
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// End-of-operation decision returned by [`SentinelManager::can_set_value`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetDecision {
    /// The proposed value is written to every target key.
    pub set: bool,
    /// The lock key content is removed.
    pub clear: bool,
    /// A concurrent operation took over the slot.
    pub conflict: bool,
    /// The slot holds a different real value; the caller should re-fetch.
    pub refresh: bool,
}

/// Decision logic for sentinels sharing a slot with cached values.
///
/// Providers consult the manager while holding whatever atomicity primitive their backend
/// offers, so every method must be pure. `current` is `None` for an empty slot.
pub trait SentinelManager: fmt::Debug + Send + Sync {
    /// Produces a fresh, unique token tagged with `kind`.
    fn generate_sentinel(&self, kind: SentinelType) -> Sentinel;

    /// Returns `true` for sentinels that acquire regardless of the slot content.
    fn can_always_set_sentinel(&self, new: &Sentinel) -> bool;

    /// Returns `true` if `new` may replace `current`.
    fn can_set_sentinel_given_curr_val(&self, current: Option<&str>, new: &Sentinel) -> bool;

    /// Returns the conflict marker to write when `new` collides with a live write lock.
    ///
    /// Providers write the marker in place of `current` and hand the caller
    /// [`Sentinel::NO_LOCK`], so that neither racing writer stores its value.
    fn conflict_sentinel(&self, current: Option<&str>, new: &Sentinel) -> Option<Sentinel>;

    /// Decides what happens when the holder of `sentinel` tries to store `proposed`.
    fn can_set_value(&self, current: Option<&str>, proposed: &str, sentinel: &Sentinel) -> SetDecision;

    /// Returns `true` if `raw` is a sentinel rather than a cached value.
    fn is_sentinel_value(&self, raw: &str) -> bool;

    /// Returns `true` if `raw` is a tombstone.
    fn is_tombstone(&self, raw: &str) -> bool {
        raw == Sentinel::TOMBSTONE.as_str()
    }
}

/// The standard sentinel rules.
///
/// Tokens look like `__sentinel__update_<uuid>`; conflict markers use the `conflict` tag.
///
/// | current \ new      | Read | Create | Update           | Delete |
/// |--------------------|------|--------|------------------|--------|
/// | empty              | yes  | yes    | yes              | yes    |
/// | cached value       | no   | no     | yes              | yes    |
/// | read lock          | no   | yes    | yes              | yes    |
/// | create/update lock | no   | no     | no, → conflict   | yes    |
/// | delete lock        | no   | no     | no               | yes    |
/// | conflict marker    | no   | no     | no               | yes    |
/// | tombstone          | no   | yes    | yes              | yes    |
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSentinelManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Empty,
    Value,
    Lock(SentinelType),
    Conflict,
    Tombstone,
    Foreign,
}

fn classify(raw: Option<&str>) -> Slot {
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Slot::Empty;
    };
    if raw == Sentinel::TOMBSTONE.as_str() {
        return Slot::Tombstone;
    }
    let Some(rest) = raw.strip_prefix(SENTINEL_PREFIX) else {
        return Slot::Value;
    };
    let tag = rest.split_once('_').map_or(rest, |(tag, _)| tag);
    if tag == CONFLICT_TAG {
        return Slot::Conflict;
    }
    SentinelType::from_tag(tag).map_or(Slot::Foreign, Slot::Lock)
}

fn token(tag: &str) -> Sentinel {
    Sentinel::new(format!("{SENTINEL_PREFIX}{tag}_{}", Uuid::new_v4()))
}

impl SentinelManager for DefaultSentinelManager {
    fn generate_sentinel(&self, kind: SentinelType) -> Sentinel {
        token(kind.as_str())
    }

    fn can_always_set_sentinel(&self, new: &Sentinel) -> bool {
        classify(Some(new.as_str())) == Slot::Lock(SentinelType::Delete)
    }

    fn can_set_sentinel_given_curr_val(&self, current: Option<&str>, new: &Sentinel) -> bool {
        let Slot::Lock(kind) = classify(Some(new.as_str())) else {
            return false;
        };
        if kind == SentinelType::Delete {
            return true;
        }

        match (classify(current), kind) {
            (Slot::Empty, _)
            | (Slot::Value, SentinelType::Update)
            | (Slot::Lock(SentinelType::Read) | Slot::Tombstone, SentinelType::Create | SentinelType::Update) => true,
            _ => false,
        }
    }

    fn conflict_sentinel(&self, current: Option<&str>, new: &Sentinel) -> Option<Sentinel> {
        let new_kind = classify(Some(new.as_str()));
        let current = classify(current);
        let collides = new_kind == Slot::Lock(SentinelType::Update)
            && matches!(current, Slot::Lock(SentinelType::Create | SentinelType::Update));
        collides.then(|| token(CONFLICT_TAG))
    }

    fn can_set_value(&self, current: Option<&str>, proposed: &str, sentinel: &Sentinel) -> SetDecision {
        if sentinel.is_no_lock() {
            return SetDecision::default();
        }

        let state = classify(current);
        if current == Some(sentinel.as_str()) {
            // Deletes never store; they only drop their own lock.
            return if state == Slot::Lock(SentinelType::Delete) {
                SetDecision {
                    clear: true,
                    ..SetDecision::default()
                }
            } else {
                SetDecision {
                    set: true,
                    ..SetDecision::default()
                }
            };
        }

        match state {
            Slot::Conflict => SetDecision {
                clear: true,
                conflict: true,
                ..SetDecision::default()
            },
            Slot::Empty | Slot::Lock(_) | Slot::Tombstone | Slot::Foreign => SetDecision {
                conflict: true,
                ..SetDecision::default()
            },
            Slot::Value if current == Some(proposed) => SetDecision::default(),
            Slot::Value => SetDecision {
                conflict: true,
                refresh: true,
                ..SetDecision::default()
            },
        }
    }

    fn is_sentinel_value(&self, raw: &str) -> bool {
        !matches!(classify(Some(raw)), Slot::Empty | Slot::Value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_sentinels_are_unique_and_tagged() {
        let a = DefaultSentinelManager.generate_sentinel(SentinelType::Update);
        let b = DefaultSentinelManager.generate_sentinel(SentinelType::Update);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("__sentinel__update_"));
    }

    #[test]
    fn classify_recognizes_every_slot_state() {
        assert_eq!(classify(None), Slot::Empty);
        assert_eq!(classify(Some("")), Slot::Empty);
        assert_eq!(classify(Some(r#"{"id":1}"#)), Slot::Value);
        assert_eq!(classify(Some("__sentinel__tombstone")), Slot::Tombstone);
        assert_eq!(classify(Some("__sentinel__conflict_abc")), Slot::Conflict);
        assert_eq!(classify(Some("__sentinel__read_abc")), Slot::Lock(SentinelType::Read));
        assert_eq!(classify(Some("__sentinel__bogus_abc")), Slot::Foreign);
    }

    #[test]
    fn only_delete_can_always_be_set() {
        let m = DefaultSentinelManager;
        assert!(m.can_always_set_sentinel(&m.generate_sentinel(SentinelType::Delete)));
        assert!(!m.can_always_set_sentinel(&m.generate_sentinel(SentinelType::Update)));
        assert!(!m.can_always_set_sentinel(&Sentinel::NO_LOCK));
    }

    #[test]
    fn no_lock_is_not_a_sentinel_value() {
        assert!(!DefaultSentinelManager.is_sentinel_value(Sentinel::NO_LOCK.as_str()));
        assert!(DefaultSentinelManager.is_sentinel_value(Sentinel::TOMBSTONE.as_str()));
    }

    #[test]
    fn conflict_marker_only_for_update_over_write_lock() {
        let m = DefaultSentinelManager;
        let create = m.generate_sentinel(SentinelType::Create);
        let update = m.generate_sentinel(SentinelType::Update);
        let read = m.generate_sentinel(SentinelType::Read);

        let marker = m.conflict_sentinel(Some(create.as_str()), &update).expect("conflict marker");
        assert!(marker.as_str().starts_with("__sentinel__conflict_"));
        assert!(m.conflict_sentinel(Some(read.as_str()), &update).is_none());
        assert!(m.conflict_sentinel(Some(update.as_str()), &create).is_none());
    }
}
