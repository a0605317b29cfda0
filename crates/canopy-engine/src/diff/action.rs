//! Plan actions

use canopy_lang::Generation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of an action plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    /// Instantiate a component that exists in desired but not actual.
    CreateComponent { key: String },

    /// Re-deploy a component whose rendered parameters changed.
    UpdateComponent { key: String },

    /// Tear down a component that left the desired state.
    DeleteComponent { key: String },

    /// Record that a claim now induces an existing service instance.
    AttachClaim { key: String, claim: String },

    /// Record that a claim no longer induces a service instance.
    DetachClaim { key: String, claim: String },

    /// Advance the recorded policy revision; always last.
    UpdatePolicyRevision { revision: Generation },
}

impl Action {
    /// Stable id used for dependency edges and result records.
    pub fn id(&self) -> String {
        match self {
            Action::CreateComponent { key } => format!("create#{key}"),
            Action::UpdateComponent { key } => format!("update#{key}"),
            Action::DeleteComponent { key } => format!("delete#{key}"),
            Action::AttachClaim { key, claim } => format!("attach#{key}#{claim}"),
            Action::DetachClaim { key, claim } => format!("detach#{key}#{claim}"),
            Action::UpdatePolicyRevision { revision } => format!("revision#{revision}"),
        }
    }

    /// The component key this action targets, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Action::CreateComponent { key }
            | Action::UpdateComponent { key }
            | Action::DeleteComponent { key }
            | Action::AttachClaim { key, .. }
            | Action::DetachClaim { key, .. } => Some(key),
            Action::UpdatePolicyRevision { .. } => None,
        }
    }

    /// Scheduling rank used to break ties among independent actions.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Action::CreateComponent { .. } => 0,
            Action::UpdateComponent { .. } => 1,
            Action::AttachClaim { .. } => 2,
            Action::DetachClaim { .. } => 3,
            Action::DeleteComponent { .. } => 4,
            Action::UpdatePolicyRevision { .. } => 5,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
