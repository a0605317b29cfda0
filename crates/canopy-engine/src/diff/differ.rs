//! Diff computation: from (actual, desired) to an action plan
//!
//! Creates and updates happen providers-first along the desired graph;
//! deletes happen dependents-first along the actual graph. Claim
//! attach/detach actions cover service (root) instances and are ordered
//! after any create and before any delete of their key. The policy
//! revision update, when present, is always last.

use crate::diff::action::Action;
use crate::diff::plan::Plan;
use crate::resolve::Resolution;

/// Compute the action plan that takes `actual` to `desired`.
pub fn diff(actual: &Resolution, desired: &Resolution) -> Plan {
    let mut plan = Plan::new();

    // Component-level create/update/delete.
    for (key, instance) in &desired.instances {
        match actual.instance(key) {
            None => {
                plan.add(Action::CreateComponent { key: key.clone() });
            }
            Some(existing) => {
                if existing.code_params != instance.code_params
                    || existing.discovery_params != instance.discovery_params
                {
                    plan.add(Action::UpdateComponent { key: key.clone() });
                }
            }
        }
    }
    for key in actual.instances.keys() {
        if !desired.instances.contains_key(key) {
            plan.add(Action::DeleteComponent { key: key.clone() });
        }
    }

    // Claim attach/detach on service (root) instances.
    for (key, instance) in &actual.instances {
        if !instance.key.is_root() {
            continue;
        }
        match desired.instance(key) {
            None => {
                for claim in &instance.claim_ids {
                    plan.add(Action::DetachClaim {
                        key: key.clone(),
                        claim: claim.clone(),
                    });
                }
            }
            Some(wanted) => {
                for claim in instance.claim_ids.difference(&wanted.claim_ids) {
                    plan.add(Action::DetachClaim {
                        key: key.clone(),
                        claim: claim.clone(),
                    });
                }
                for claim in wanted.claim_ids.difference(&instance.claim_ids) {
                    plan.add(Action::AttachClaim {
                        key: key.clone(),
                        claim: claim.clone(),
                    });
                }
            }
        }
    }

    // Happens-before edges.
    let ids: Vec<(String, Action)> = plan
        .actions()
        .map(|(id, action)| (id.clone(), action.clone()))
        .collect();
    for (id, action) in &ids {
        match action {
            Action::CreateComponent { key } | Action::UpdateComponent { key } => {
                // Providers first, along the desired graph.
                if let Some(instance) = desired.instance(key) {
                    for out in &instance.edges_out {
                        for prerequisite in [format!("create#{out}"), format!("update#{out}")] {
                            if plan.contains(&prerequisite) {
                                plan.add_dependency(id, &prerequisite);
                            }
                        }
                    }
                }
            }
            Action::DeleteComponent { key } => {
                // Dependents first, along the actual graph.
                if let Some(instance) = actual.instance(key) {
                    for inn in &instance.edges_in {
                        let prerequisite = format!("delete#{inn}");
                        if plan.contains(&prerequisite) {
                            plan.add_dependency(id, &prerequisite);
                        }
                    }
                }
                // Claim detaches precede the delete of their key.
                for (other_id, other) in &ids {
                    if let Action::DetachClaim { key: detach_key, .. } = other {
                        if detach_key == key {
                            plan.add_dependency(id, other_id);
                        }
                    }
                }
            }
            Action::AttachClaim { key, .. } => {
                let create = format!("create#{key}");
                if plan.contains(&create) {
                    plan.add_dependency(id, &create);
                }
            }
            Action::DetachClaim { .. } | Action::UpdatePolicyRevision { .. } => {}
        }
    }

    // Revision update last, once there is anything to apply or record.
    if !plan.is_empty() || actual.policy_revision != desired.policy_revision {
        let revision_id = plan.add(Action::UpdatePolicyRevision {
            revision: desired.policy_revision,
        });
        for (id, _) in &ids {
            plan.add_dependency(&revision_id, id);
        }
    }

    plan
}
