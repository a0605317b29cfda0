//! Object metadata and identifiers
//!
//! Every policy object is addressed by `(namespace, kind, name, generation)`.
//! Namespaces and names are identifiers: a letter followed by letters,
//! digits, underscores, or dashes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing object generation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// The next generation in the stream.
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata carried by every policy object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub generation: Generation,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: Generation::default(),
        }
    }

    /// Fully qualified `namespace/name` form.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Check that a string is a valid identifier: `[A-Za-z][A-Za-z0-9_-]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Resolve an object reference against a default namespace.
///
/// References are either bare names (`web`) resolved in the default
/// namespace, or qualified (`prod/web`).
pub fn resolve_reference(reference: &str, default_namespace: &str) -> (String, String) {
    match reference.split_once('/') {
        Some((ns, name)) => (ns.to_string(), name.to_string()),
        None => (default_namespace.to_string(), reference.to_string()),
    }
}
