//! Action plans: a DAG of actions with a happens-before partial order

use crate::diff::action::Action;
use crate::error::PlanError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A set of actions plus their happens-before dependencies.
///
/// Incomparable actions may run in any interleaving; the deterministic
/// [`execution_order`](Plan::execution_order) breaks ties by action rank
/// and id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    actions: BTreeMap<String, Action>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action, returning its id. Adding the same action twice is a
    /// no-op.
    pub fn add(&mut self, action: Action) -> String {
        let id = action.id();
        self.actions.entry(id.clone()).or_insert(action);
        id
    }

    /// Record that `id` must not start before `prerequisite` completed.
    pub fn add_dependency(&mut self, id: &str, prerequisite: &str) {
        if id == prerequisite {
            return;
        }
        self.dependencies
            .entry(id.to_string())
            .or_default()
            .insert(prerequisite.to_string());
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    pub fn actions(&self) -> impl Iterator<Item = (&String, &Action)> {
        self.actions.iter()
    }

    /// Prerequisites of one action.
    pub fn dependencies_of(&self, id: &str) -> BTreeSet<String> {
        self.dependencies.get(id).cloned().unwrap_or_default()
    }

    /// `prerequisite -> dependents` view of the dependency edges.
    pub fn dependents(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, prerequisites) in &self.dependencies {
            for prerequisite in prerequisites {
                reverse
                    .entry(prerequisite.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
        reverse
    }

    /// Deterministic total order compatible with the happens-before
    /// partial order: among ready actions, lowest (rank, id) first.
    pub fn execution_order(&self) -> Result<Vec<String>, PlanError> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        for id in self.actions.keys() {
            let count = self
                .dependencies
                .get(id)
                .map(|d| d.iter().filter(|p| self.contains(p)).count())
                .unwrap_or(0);
            indegree.insert(id, count);
        }

        let dependents = self.dependents();
        let mut ready: BTreeSet<(u8, &str)> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| (self.rank_of(id), *id))
            .collect();

        let mut order = Vec::with_capacity(self.actions.len());
        while let Some((rank, id)) = ready.iter().next().copied() {
            ready.remove(&(rank, id));
            order.push(id.to_string());

            if let Some(next) = dependents.get(id) {
                for dependent in next {
                    if !self.contains(dependent) {
                        continue;
                    }
                    let count = indegree
                        .get_mut(dependent.as_str())
                        .expect("dependent indexed");
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((self.rank_of(dependent), dependent.as_str()));
                    }
                }
            }
        }

        if order.len() < self.actions.len() {
            let stuck = self
                .actions
                .keys()
                .find(|id| !order.contains(*id))
                .cloned()
                .unwrap_or_default();
            return Err(PlanError::Cycle(stuck));
        }
        Ok(order)
    }

    fn rank_of(&self, id: &str) -> u8 {
        self.actions.get(id).map(|a| a.rank()).unwrap_or(u8::MAX)
    }
}
