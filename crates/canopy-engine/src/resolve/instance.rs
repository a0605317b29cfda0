//! Component instances: the unit of desired and actual state

use crate::resolve::key::ComponentKey;
use canopy_lang::{LabelSet, Value};
use canopy_plugin::EndpointMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Label carrying the placement decision for an instance.
pub const CLUSTER_LABEL: &str = "cluster";

/// One materialized component (or service root) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstance {
    pub key: ComponentKey,

    /// Labels calculated along the resolution path.
    #[serde(default, skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,

    /// Code type of the backing component; `None` for roots and
    /// components without code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_type: Option<String>,

    /// Rendered code parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub code_params: Value,

    /// Rendered discovery parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub discovery_params: Value,

    /// Canonical keys of instances that depend on this one.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub edges_in: BTreeSet<String>,

    /// Canonical keys of instances this one depends on.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub edges_out: BTreeSet<String>,

    /// Ids of the claims that induced this instance.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub claim_ids: BTreeSet<String>,

    /// Endpoints discovered after a successful create/update.
    #[serde(default, skip_serializing_if = "EndpointMap::is_empty")]
    pub endpoints: EndpointMap,
}

impl ComponentInstance {
    pub fn new(key: ComponentKey) -> Self {
        Self {
            key,
            labels: LabelSet::new(),
            code_type: None,
            code_params: Value::Null,
            discovery_params: Value::Null,
            edges_in: BTreeSet::new(),
            edges_out: BTreeSet::new(),
            claim_ids: BTreeSet::new(),
            endpoints: EndpointMap::new(),
        }
    }

    /// The cluster this instance is placed on, from its calculated labels.
    pub fn cluster(&self) -> Option<&str> {
        self.labels.get(CLUSTER_LABEL)
    }

    /// Whether applying this instance involves a code plugin.
    pub fn has_code(&self) -> bool {
        self.code_type.is_some()
    }

    /// Plugin deploy name: the canonical key string.
    pub fn deploy_name(&self) -> String {
        self.key.as_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_comes_from_labels() {
        let mut instance = ComponentInstance::new(ComponentKey::root(
            "main",
            "web",
            "dev",
            vec![],
            "web-stack",
        ));
        assert_eq!(instance.cluster(), None);

        instance.labels.set(CLUSTER_LABEL, "system/us-east");
        assert_eq!(instance.cluster(), Some("system/us-east"));
    }
}
