// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache key naming.

use std::{collections::BTreeMap, fmt};

use cachelock_provider::Key;
use uuid::Uuid;

/// Maps logical key identifiers and their components to cache keys.
///
/// Implementations must be deterministic and must never map two different
/// `(id, components)` pairs to the same key.
pub trait KeyNameProvider: Send + Sync + fmt::Debug {
    /// Returns the key for `id` built from `components`.
    fn key_name(&self, id: &str, components: &[&str]) -> Key;

    /// Returns the key for `id` and an entity identifier.
    fn key_name_with_id(&self, id: &str, entity: Uuid) -> Key {
        self.key_name(id, &[&entity.to_string()])
    }

    /// Returns the key for `id` and a single name component.
    fn key_name_with_string(&self, id: &str, name: &str) -> Key {
        self.key_name(id, &[name])
    }

    /// Returns the key for an `id` that takes no components.
    fn key_name_static(&self, id: &str) -> Key {
        self.key_name(id, &[])
    }

    /// Returns every identifier with a registered template.
    fn all_key_ids(&self) -> Vec<&str>;

    /// Returns the namespace root shared by every key.
    fn prefix(&self) -> &str;
}

/// Template-based [`KeyNameProvider`].
///
/// Every key is `{prefix}:{rendered}`. Templates use `{}` as a positional placeholder;
/// components without a placeholder are appended with `:` separators, and placeholders
/// without a component render as a literal `{}`. Identifiers without a template render as
/// `{id}:{components...}`.
///
/// Components are percent-encoded: only ASCII alphanumerics, `-` and `.` are kept as-is,
/// so a component can never contain a separator and two different component lists of the
/// same identifier never render to the same key. Untemplated identifiers only have `:` and
/// `%` encoded. Templates of different identifiers must not overlap.
///
/// # Examples
///
/// ```
/// use cachelock::{KeyNameProvider, KeyNames};
///
/// let names = KeyNames::new("authz")
///     .with_template("USER", "USER_{}")
///     .with_template("ROLE_MEMBERS", "ROLE_{}_MEMBERS");
///
/// assert_eq!(names.key_name_with_string("USER", "42").as_str(), "authz:USER_42");
/// assert_eq!(names.key_name_with_string("ROLE_MEMBERS", "admin").as_str(), "authz:ROLE_admin_MEMBERS");
/// assert_eq!(names.key_name("GROUP", &["a", "b"]).as_str(), "authz:GROUP:a:b");
/// assert_eq!(names.key_name("GROUP", &["a:b"]).as_str(), "authz:GROUP:a%3Ab");
/// ```
#[derive(Clone, Debug)]
pub struct KeyNames {
    prefix: String,
    templates: BTreeMap<String, String>,
}

impl KeyNames {
    /// Creates a provider rooted at `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            templates: BTreeMap::new(),
        }
    }

    /// Registers the template for `id`.
    ///
    /// # Panics
    ///
    /// Panics if a placeholder is directly followed by `%`, `{` or a character that can
    /// appear in an encoded component, since the rendered keys would be ambiguous.
    #[must_use]
    pub fn with_template(mut self, id: impl Into<String>, template: impl Into<String>) -> Self {
        let template = template.into();
        assert!(
            is_unambiguous(&template),
            "placeholders in key template `{template}` must be followed by a delimiter"
        );
        self.templates.insert(id.into(), template);
        self
    }
}

const PLACEHOLDER: &str = "{}";
const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_component_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.'
}

fn is_id_char(c: char) -> bool {
    c != ':' && c != '%'
}

fn is_unambiguous(template: &str) -> bool {
    let mut literals = template.split(PLACEHOLDER).skip(1).peekable();
    while let Some(literal) = literals.next() {
        let delimited = match literal.chars().next() {
            Some(next) => !is_component_char(next) && next != '%' && next != '{',
            None => literals.peek().is_none(),
        };
        if !delimited {
            return false;
        }
    }
    true
}

fn encode(raw: &str, keep: fn(char) -> bool, out: &mut String) {
    let mut buf = [0; 4];
    for c in raw.chars() {
        if keep(c) {
            out.push(c);
            continue;
        }
        for byte in c.encode_utf8(&mut buf).bytes() {
            out.push('%');
            out.push(char::from(HEX[usize::from(byte >> 4)]));
            out.push(char::from(HEX[usize::from(byte & 0x0F)]));
        }
    }
}

fn render(template: &str, components: &[&str]) -> String {
    let mut rendered = String::with_capacity(template.len() + components.iter().map(|c| c.len() + 1).sum::<usize>());
    let mut components = components.iter();
    let mut pieces = template.split(PLACEHOLDER);
    if let Some(first) = pieces.next() {
        rendered.push_str(first);
    }
    for piece in pieces {
        match components.next() {
            Some(component) => encode(component, is_component_char, &mut rendered),
            None => rendered.push_str(PLACEHOLDER),
        }
        rendered.push_str(piece);
    }
    append(&mut rendered, components.as_slice());
    rendered
}

fn append(rendered: &mut String, components: &[&str]) {
    for component in components {
        rendered.push(':');
        encode(component, is_component_char, rendered);
    }
}

impl KeyNameProvider for KeyNames {
    fn key_name(&self, id: &str, components: &[&str]) -> Key {
        let mut key = String::with_capacity(self.prefix.len() + id.len() + 1);
        key.push_str(&self.prefix);
        key.push(':');
        if let Some(template) = self.templates.get(id) {
            key.push_str(&render(template, components));
        } else {
            encode(id, is_id_char, &mut key);
            append(&mut key, components);
        }
        Key::new(key)
    }

    fn all_key_ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}
