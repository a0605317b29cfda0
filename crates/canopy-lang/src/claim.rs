//! Claim objects: consumer declarations against services

use crate::labels::LabelSet;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};

/// A consumer's declaration "I want service S, optionally with labels L".
///
/// Claims are mutable inputs: unlike policy kinds they carry their own
/// generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub metadata: Metadata,

    /// The user submitting the claim.
    pub user: String,

    /// Service reference, bare or `namespace/name` qualified.
    pub service: String,

    #[serde(default, skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,
}

impl Claim {
    /// The claim id used in resolutions and action plans.
    pub fn id(&self) -> String {
        self.metadata.qualified_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_claim_yaml() {
        let claim: Claim = serde_yaml::from_str(
            "metadata:\n  namespace: main\n  name: web-for-alice\nuser: alice\nservice: web\nlabels:\n  env: dev\n",
        )
        .unwrap();
        assert_eq!(claim.id(), "main/web-for-alice");
        assert_eq!(claim.user, "alice");
        assert_eq!(claim.labels.get("env"), Some("dev"));
    }
}
