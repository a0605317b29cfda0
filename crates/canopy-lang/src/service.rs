//! Service objects: the consumer-facing surface of the policy
//!
//! A service is a set of conditional contexts. The first context whose
//! criteria match the claim's labels selects the bundle and allocation
//! strategy used to materialize the claim.

use crate::criteria::Criteria;
use crate::labels::LabelOperations;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};

/// Bundle selection and instance discrimination for a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Bundle reference, bare or `namespace/name` qualified.
    pub bundle: String,

    /// Allocation key templates, rendered in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

/// A conditional branch of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    #[serde(
        default,
        rename = "change-labels",
        skip_serializing_if = "Option::is_none"
    )]
    pub change_labels: Option<LabelOperations>,

    pub allocation: Allocation,
}

/// A named service consumers can claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: Metadata,

    /// Label operations applied to every claim of this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelOperations>,

    #[serde(default)]
    pub contexts: Vec<ServiceContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_yaml() {
        let service: Service = serde_yaml::from_str(
            concat!(
                "metadata:\n  namespace: main\n  name: web\n",
                "labels:\n  set:\n    tier: frontend\n",
                "contexts:\n",
                "  - name: dev\n",
                "    criteria:\n      require-all:\n        - env == 'dev'\n",
                "    change-labels:\n      set:\n        cluster: minikube\n",
                "    allocation:\n      bundle: web-stack\n      keys:\n        - \"{{ .Claim.Id }}\"\n",
                "  - name: prod\n",
                "    allocation:\n      bundle: prod/web-stack\n",
            ),
        )
        .unwrap();

        assert_eq!(service.contexts.len(), 2);
        let dev = &service.contexts[0];
        assert_eq!(dev.allocation.keys, vec!["{{ .Claim.Id }}"]);
        assert!(dev.criteria.is_some());
        assert!(dev.change_labels.is_some());
        assert_eq!(service.contexts[1].allocation.bundle, "prod/web-stack");
    }
}
