//! Label sets and label operations
//!
//! Labels drive everything in Canopy: context selection, rule matching, and
//! placement. A label set is an ordered map so that serialization and
//! iteration are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An ordered set of string labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.labels.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// New set with `other`'s labels applied on top of this one.
    pub fn merged(&self, other: &LabelSet) -> LabelSet {
        let mut labels = self.labels.clone();
        for (k, v) in &other.labels {
            labels.insert(k.clone(), v.clone());
        }
        LabelSet { labels }
    }

    /// Apply a set of label operations in place.
    ///
    /// Within a single operation set, removals apply after sets on the
    /// same key.
    pub fn apply(&mut self, ops: &LabelOperations) {
        for (k, v) in &ops.set {
            self.labels.insert(k.clone(), v.clone());
        }
        for k in &ops.remove {
            self.labels.remove(k);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        LabelSet {
            labels: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Declarative label mutation: set some keys, then remove some keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelOperations {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl LabelOperations {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_prefers_other() {
        let base: LabelSet = [("env", "dev"), ("team", "core")].into_iter().collect();
        let over: LabelSet = [("env", "prod")].into_iter().collect();

        let merged = base.merged(&over);
        assert_eq!(merged.get("env"), Some("prod"));
        assert_eq!(merged.get("team"), Some("core"));
    }

    #[test]
    fn removals_apply_after_sets() {
        let mut labels: LabelSet = [("env", "dev")].into_iter().collect();
        let ops = LabelOperations {
            set: [("env".to_string(), "prod".to_string())].into_iter().collect(),
            remove: vec!["env".to_string()],
        };

        labels.apply(&ops);
        assert_eq!(labels.get("env"), None);
    }

    #[test]
    fn serializes_transparently() {
        let labels: LabelSet = [("env", "dev")].into_iter().collect();
        let yaml = serde_yaml::to_string(&labels).unwrap();
        assert_eq!(yaml.trim(), "env: dev");
    }
}
