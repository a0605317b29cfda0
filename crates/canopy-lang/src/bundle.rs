//! Bundle objects: reusable composites of code components
//!
//! Components within a bundle may depend on siblings; the dependency graph
//! must be acyclic. The topological order is computed once per bundle and
//! cached, including the failure case.

use crate::metadata::Metadata;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors in a bundle's component topology.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BundleTopologyError {
    #[error("component cycle in bundle '{bundle}' between '{component}' and '{dependency}'")]
    Cycle {
        bundle: String,
        component: String,
        dependency: String,
    },

    #[error("bundle '{bundle}' component '{component}' depends on unknown component '{dependency}'")]
    MissingDependency {
        bundle: String,
        component: String,
        dependency: String,
    },
}

/// Deployable code attached to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    #[serde(rename = "type")]
    pub code_type: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// A single component of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleComponent {
    pub name: String,

    /// Cross-service link: this component consumes another service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub discovery: Value,

    /// Names of sibling components this component depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// A bundle of components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub metadata: Metadata,

    #[serde(default)]
    pub components: Vec<BundleComponent>,

    #[serde(skip)]
    topology: OnceLock<Result<Vec<String>, BundleTopologyError>>,
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.components == other.components
    }
}

impl Bundle {
    pub fn new(metadata: Metadata, components: Vec<BundleComponent>) -> Self {
        Self {
            metadata,
            components,
            topology: OnceLock::new(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&BundleComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Component names in dependency order, providers before dependents.
    ///
    /// Computed once and cached; a cycle or missing dependency is cached as
    /// the error result.
    pub fn components_topological(&self) -> Result<&[String], BundleTopologyError> {
        self.topology
            .get_or_init(|| self.sort_components())
            .as_ref()
            .map(|order| order.as_slice())
            .map_err(Clone::clone)
    }

    fn sort_components(&self) -> Result<Vec<String>, BundleTopologyError> {
        // 3-color DFS: absent = white, false = in progress, true = done.
        let mut colors: BTreeMap<&str, bool> = BTreeMap::new();
        let mut order = Vec::with_capacity(self.components.len());

        for component in &self.components {
            if !colors.contains_key(component.name.as_str()) {
                self.visit(component, &mut colors, &mut order)?;
            }
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        component: &'a BundleComponent,
        colors: &mut BTreeMap<&'a str, bool>,
        order: &mut Vec<String>,
    ) -> Result<(), BundleTopologyError> {
        colors.insert(&component.name, false);

        for dependency in &component.dependencies {
            let Some(next) = self.component(dependency) else {
                return Err(BundleTopologyError::MissingDependency {
                    bundle: self.metadata.qualified_name(),
                    component: component.name.clone(),
                    dependency: dependency.clone(),
                });
            };
            match colors.get(next.name.as_str()) {
                None => self.visit(next, colors, order)?,
                Some(false) => {
                    return Err(BundleTopologyError::Cycle {
                        bundle: self.metadata.qualified_name(),
                        component: component.name.clone(),
                        dependency: dependency.clone(),
                    })
                }
                Some(true) => {}
            }
        }

        order.push(component.name.clone());
        colors.insert(&component.name, true);
        Ok(())
    }
}
