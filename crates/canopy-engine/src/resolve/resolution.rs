//! Resolutions: the desired or actual state of the world
//!
//! A resolution maps canonical component keys to instances and records the
//! per-claim outcome. All maps are ordered, so serializing the same
//! resolution always produces identical bytes.

use crate::resolve::instance::ComponentInstance;
use crate::resolve::key::ComponentKey;
use canopy_lang::Generation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of resolving one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClaimStatus {
    /// The claim materialized; `root` is the service instance key.
    Resolved { root: String },

    /// The claim failed to materialize.
    Failed { error: String },
}

/// A full resolution of (policy, claims) or the recorded actual state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Revision of the policy this resolution was computed from.
    #[serde(default)]
    pub policy_revision: Generation,

    /// Instances by canonical key string.
    #[serde(default)]
    pub instances: BTreeMap<String, ComponentInstance>,

    /// Per-claim outcomes, by claim id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, ClaimStatus>,
}

impl Resolution {
    pub fn new(policy_revision: Generation) -> Self {
        Self {
            policy_revision,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance(&self, key: &str) -> Option<&ComponentInstance> {
        self.instances.get(key)
    }

    /// Get or create the instance for a key.
    pub fn instance_mut(&mut self, key: &ComponentKey) -> &mut ComponentInstance {
        self.instances
            .entry(key.as_string())
            .or_insert_with(|| ComponentInstance::new(key.clone()))
    }

    /// Record a dependency edge `from -> to`, creating both endpoints.
    pub fn add_edge(&mut self, from: &ComponentKey, to: &ComponentKey) {
        self.instance_mut(from).edges_out.insert(to.as_string());
        self.instance_mut(to).edges_in.insert(from.as_string());
    }

    /// Merge another resolution in, unioning edges and claim ids of
    /// instances with identical keys.
    pub fn merge(&mut self, other: Resolution) {
        for (key, incoming) in other.instances {
            match self.instances.get_mut(&key) {
                None => {
                    self.instances.insert(key, incoming);
                }
                Some(existing) => {
                    existing.edges_in.extend(incoming.edges_in);
                    existing.edges_out.extend(incoming.edges_out);
                    existing.claim_ids.extend(incoming.claim_ids);
                }
            }
        }
        for (claim, status) in other.claims {
            self.claims.insert(claim, status);
        }
    }

    /// Deterministic serialized form.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Find a dependency cycle among instances, if any.
    ///
    /// Returns the canonical key where a cycle was detected.
    pub fn find_cycle(&self) -> Option<String> {
        // 3-color DFS over edges_out; false = in progress, true = done.
        let mut colors: BTreeMap<&str, bool> = BTreeMap::new();
        let mut stack: Vec<(&str, Vec<&str>)> = Vec::new();

        for start in self.instances.keys() {
            if colors.contains_key(start.as_str()) {
                continue;
            }
            stack.push((start, self.edges_of(start)));
            colors.insert(start, false);

            while !stack.is_empty() {
                let next = stack
                    .last_mut()
                    .and_then(|(_, edges)| edges.pop());
                match next {
                    Some(next) => match colors.get(next) {
                        None => {
                            colors.insert(next, false);
                            stack.push((next, self.edges_of(next)));
                        }
                        Some(false) => return Some(next.to_string()),
                        Some(true) => {}
                    },
                    None => {
                        if let Some((node, _)) = stack.pop() {
                            colors.insert(node, true);
                        }
                    }
                }
            }
        }
        None
    }

    fn edges_of(&self, key: &str) -> Vec<&str> {
        self.instances
            .get(key)
            .map(|i| i.edges_out.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(component: &str) -> ComponentKey {
        let root = ComponentKey::root("main", "web", "dev", vec!["k".to_string()], "b");
        if component.is_empty() {
            root
        } else {
            root.with_component(component)
        }
    }

    #[test]
    fn merge_unions_edges_and_claims() {
        let mut left = Resolution::default();
        left.instance_mut(&key("")).claim_ids.insert("main/cl1".to_string());

        let mut right = Resolution::default();
        right.instance_mut(&key("")).claim_ids.insert("main/cl2".to_string());
        right.add_edge(&key("app"), &key(""));

        left.merge(right);
        let root = left.instance(&key("").as_string()).unwrap();
        assert_eq!(root.claim_ids.len(), 2);
        assert!(root.edges_in.contains(&key("app").as_string()));
    }

    #[test]
    fn serialization_is_deterministic() {
        let build = || {
            let mut resolution = Resolution::new(Generation(3));
            resolution.add_edge(&key("app"), &key(""));
            resolution.add_edge(&key("app"), &key("db"));
            resolution
                .claims
                .insert("main/cl1".to_string(), ClaimStatus::Resolved {
                    root: key("").as_string(),
                });
            resolution
        };
        assert_eq!(build().to_yaml().unwrap(), build().to_yaml().unwrap());
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let mut resolution = Resolution::default();
        resolution.add_edge(&key("app"), &key("db"));
        resolution.add_edge(&key("app"), &key(""));
        resolution.add_edge(&key("db"), &key(""));
        assert_eq!(resolution.find_cycle(), None);
    }

    #[test]
    fn cycle_is_detected() {
        let mut resolution = Resolution::default();
        resolution.add_edge(&key("a"), &key("b"));
        resolution.add_edge(&key("b"), &key("a"));
        assert!(resolution.find_cycle().is_some());
    }
}
