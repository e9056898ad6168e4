//! Field identifiers and field sets.
//!
//! Event fields of schema-less streams may be containers, so a query can
//! reference `field.key1` or `field.$0`. Registered event types only accept
//! flat identifiers; `escape_name` maps a dotted field body onto one.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Encode a dotted field body into a flat identifier.
///
/// ```text
/// field          -> field
/// field.key1     -> field$key1
/// field.0        -> field$$0
/// field.key1.$0  -> field$key1$$0
/// odd-name.x     -> odd_name$x
/// ```
pub fn escape_name(body: &str) -> String {
    body.split('.')
        .map(escape_part)
        .collect::<Vec<_>>()
        .join("$")
}

fn escape_part(part: &str) -> String {
    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if is_digits(part) {
        return format!("${}", part);
    }
    if let Some(index) = part.strip_prefix('$') {
        if is_digits(index) {
            return format!("${}", index);
        }
    }
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The known fields of one target, as registered by a caller.
///
/// Maps a raw (dotted) field name to a type label such as `string` or
/// `long`. This crate never computes field sets; it only checks queries
/// against them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    pub fields: BTreeMap<String, String>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, type_label: impl Into<String>) {
        self.fields.insert(name.into(), type_label.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// True when every name in `fields` is known to this set.
    pub fn covers<'a>(&self, mut fields: impl Iterator<Item = &'a str>) -> bool {
        fields.all(|f| self.contains(f))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        for (name, type_label) in iter {
            set.insert(name, type_label);
        }
        set
    }
}
