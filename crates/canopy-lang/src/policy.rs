//! The indexed, immutable policy revision
//!
//! A policy is a mapping from `(namespace, kind, name)` to objects. Objects
//! are added from a stream (e.g. parsed YAML documents) and then validated
//! as a whole; after that the policy is treated as immutable.

use crate::bundle::Bundle;
use crate::claim::Claim;
use crate::cluster::Cluster;
use crate::metadata::{resolve_reference, Generation, Metadata};
use crate::rule::Rule;
use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while assembling a policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: String, name: String },
}

/// Any policy object, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PolicyObject {
    Cluster(Cluster),
    Bundle(Bundle),
    Service(Service),
    Rule(Rule),
    AclRule(Rule),
    Claim(Claim),
}

impl PolicyObject {
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyObject::Cluster(_) => "cluster",
            PolicyObject::Bundle(_) => "bundle",
            PolicyObject::Service(_) => "service",
            PolicyObject::Rule(_) => "rule",
            PolicyObject::AclRule(_) => "acl-rule",
            PolicyObject::Claim(_) => "claim",
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            PolicyObject::Cluster(o) => &o.metadata,
            PolicyObject::Bundle(o) => &o.metadata,
            PolicyObject::Service(o) => &o.metadata,
            PolicyObject::Rule(o) => &o.metadata,
            PolicyObject::AclRule(o) => &o.metadata,
            PolicyObject::Claim(o) => &o.metadata,
        }
    }
}

/// All objects of one namespace, indexed by kind and name.
#[derive(Debug, Clone, Default)]
pub struct PolicyNamespace {
    pub clusters: BTreeMap<String, Cluster>,
    pub bundles: BTreeMap<String, Bundle>,
    pub services: BTreeMap<String, Service>,
    pub rules: BTreeMap<String, Rule>,
    pub acl_rules: BTreeMap<String, Rule>,
    pub claims: BTreeMap<String, Claim>,
}

/// A validated, immutable policy revision.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    revision: Generation,
    namespaces: BTreeMap<String, PolicyNamespace>,
}

impl Policy {
    pub fn new(revision: Generation) -> Self {
        Self {
            revision,
            namespaces: BTreeMap::new(),
        }
    }

    pub fn revision(&self) -> Generation {
        self.revision
    }

    /// Add an object, rejecting duplicates of the same (namespace, kind, name).
    pub fn add_object(&mut self, object: PolicyObject) -> Result<(), PolicyError> {
        let kind = object.kind();
        let metadata = object.metadata().clone();
        let ns = self.namespaces.entry(metadata.namespace.clone()).or_default();

        let duplicate = match object {
            PolicyObject::Cluster(o) => ns.clusters.insert(metadata.name.clone(), o).is_some(),
            PolicyObject::Bundle(o) => ns.bundles.insert(metadata.name.clone(), o).is_some(),
            PolicyObject::Service(o) => ns.services.insert(metadata.name.clone(), o).is_some(),
            PolicyObject::Rule(o) => ns.rules.insert(metadata.name.clone(), o).is_some(),
            PolicyObject::AclRule(o) => ns.acl_rules.insert(metadata.name.clone(), o).is_some(),
            PolicyObject::Claim(o) => ns.claims.insert(metadata.name.clone(), o).is_some(),
        };

        if duplicate {
            return Err(PolicyError::Duplicate {
                kind: kind.to_string(),
                name: metadata.qualified_name(),
            });
        }
        Ok(())
    }

    /// Parse a multi-document YAML stream and add every object.
    ///
    /// Empty documents (e.g. from trailing separators) are skipped.
    pub fn add_yaml(&mut self, yaml: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let object: PolicyObject = serde_yaml::from_value(value)?;
            self.add_object(object)?;
        }
        Ok(())
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &PolicyNamespace)> {
        self.namespaces.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn namespace(&self, namespace: &str) -> Option<&PolicyNamespace> {
        self.namespaces.get(namespace)
    }

    pub fn service(&self, reference: &str, default_namespace: &str) -> Option<&Service> {
        let (ns, name) = resolve_reference(reference, default_namespace);
        self.namespaces.get(&ns)?.services.get(&name)
    }

    pub fn bundle(&self, reference: &str, default_namespace: &str) -> Option<&Bundle> {
        let (ns, name) = resolve_reference(reference, default_namespace);
        self.namespaces.get(&ns)?.bundles.get(&name)
    }

    pub fn cluster(&self, reference: &str, default_namespace: &str) -> Option<&Cluster> {
        let (ns, name) = resolve_reference(reference, default_namespace);
        self.namespaces.get(&ns)?.clusters.get(&name)
    }

    /// All claims across namespaces, ordered by fully qualified name.
    pub fn claims(&self) -> Vec<&Claim> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.claims.values())
            .collect()
    }

    /// All rules across namespaces, unsorted.
    pub fn rules(&self) -> Vec<&Rule> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.rules.values())
            .collect()
    }

    /// All ACL rules across namespaces, unsorted.
    pub fn acl_rules(&self) -> Vec<&Rule> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.acl_rules.values())
            .collect()
    }
}
