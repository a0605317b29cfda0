//! Rules and the rule engine
//!
//! Rules are weighted, criteria-gated actions over a working label set.
//! They are applied in order (weight descending, qualified name ascending);
//! label mutations made by one rule are visible to the rules after it. The
//! first `reject` terminates the pass with a rejection.

use crate::criteria::Criteria;
use crate::expression::{ExpressionCache, ExpressionError};
use crate::labels::{LabelOperations, LabelSet};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allow/reject verdict carried by ingress actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Reject,
}

/// Claim insertion target for `claim-action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTarget {
    /// Service reference, bare or `namespace/name` qualified.
    pub service: String,
}

/// A single rule action, dispatched by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    /// Mutate the working label set.
    ChangeLabels(LabelOperations),

    /// Insert an additional claim for the given service.
    ClaimAction(ClaimTarget),

    /// Allow or reject ingress traffic.
    IngressAction(Decision),

    /// Grant roles over namespaces (`role -> namespaces`, `*` = all).
    AddRole(BTreeMap<String, Vec<String>>),

    /// Record allowance and continue.
    Allow,

    /// Short-circuit the pass with a rejection.
    Reject,
}

/// A weighted, criteria-gated rule.
///
/// The same shape backs both `rule` and `aclrule` objects; the kind tag
/// lives on the enclosing policy object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub metadata: Metadata,

    #[serde(default)]
    pub weight: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub actions: Vec<RuleAction>,
}

/// Role grants accumulated by `add-role` actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMap {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl RoleMap {
    pub fn grant(&mut self, role: impl Into<String>, namespace: impl Into<String>) {
        self.grants
            .entry(role.into())
            .or_default()
            .insert(namespace.into());
    }

    /// Whether `role` is granted for `namespace` (`*` grants all).
    pub fn has_role(&self, role: &str, namespace: &str) -> bool {
        self.grants
            .get(role)
            .map(|namespaces| namespaces.contains("*") || namespaces.contains(namespace))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Result of applying a rule list to a label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    /// The working label set after all mutations.
    pub labels: LabelSet,

    /// Qualified name of the rejecting rule, if any.
    pub rejected_by: Option<String>,

    /// Qualified names of rules that recorded allowance.
    pub allowed_by: Vec<String>,

    /// Service references of claims inserted by `claim-action`.
    pub inserted_claims: Vec<String>,

    /// Last ingress decision emitted, if any.
    pub ingress: Option<Decision>,

    /// Accumulated role grants.
    pub roles: RoleMap,

    /// Qualified names of all matched rules, in application order.
    pub matched: Vec<String>,
}

impl RuleOutcome {
    pub fn is_rejected(&self) -> bool {
        self.rejected_by.is_some()
    }
}

/// Apply rules (already sorted) to a label set.
///
/// The terminal outcome is the first rejection, otherwise allowed.
pub fn apply_rules<'a>(
    rules: impl IntoIterator<Item = &'a Rule>,
    labels: &LabelSet,
    cache: &ExpressionCache,
) -> Result<RuleOutcome, ExpressionError> {
    let mut outcome = RuleOutcome {
        labels: labels.clone(),
        ..RuleOutcome::default()
    };

    for rule in rules {
        let matches = match &rule.criteria {
            Some(criteria) => criteria.matches(&outcome.labels, cache)?,
            None => true,
        };
        if !matches {
            continue;
        }

        let name = rule.metadata.qualified_name();
        tracing::debug!(rule = %name, "rule matched");
        outcome.matched.push(name.clone());

        for action in &rule.actions {
            match action {
                RuleAction::ChangeLabels(ops) => outcome.labels.apply(ops),
                RuleAction::ClaimAction(target) => {
                    outcome.inserted_claims.push(target.service.clone())
                }
                RuleAction::IngressAction(decision) => outcome.ingress = Some(*decision),
                RuleAction::AddRole(grants) => {
                    for (role, namespaces) in grants {
                        for namespace in namespaces {
                            outcome.roles.grant(role.clone(), namespace.clone());
                        }
                    }
                }
                RuleAction::Allow => outcome.allowed_by.push(name.clone()),
                RuleAction::Reject => {
                    outcome.rejected_by = Some(name);
                    return Ok(outcome);
                }
            }
        }
    }

    Ok(outcome)
}

/// Evaluate ACL rules for a user's label set, returning the granted roles.
///
/// A rejection wipes all grants accumulated so far.
pub fn resolve_roles<'a>(
    acl_rules: impl IntoIterator<Item = &'a Rule>,
    labels: &LabelSet,
    cache: &ExpressionCache,
) -> Result<RoleMap, ExpressionError> {
    let outcome = apply_rules(sort_rules(acl_rules), labels, cache)?;
    if outcome.is_rejected() {
        return Ok(RoleMap::default());
    }
    Ok(outcome.roles)
}

/// Sort rules for application: weight descending, qualified name ascending.
pub fn sort_rules<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Vec<&'a Rule> {
    let mut sorted: Vec<&Rule> = rules.into_iter().collect();
    sorted.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.metadata.qualified_name().cmp(&b.metadata.qualified_name()))
    });
    sorted
}
