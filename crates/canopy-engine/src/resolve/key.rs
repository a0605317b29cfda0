//! Component instance keys
//!
//! A key identifies one materialized instance:
//! `(namespace, service, context, allocation keys, bundle, component)`.
//! The root instance of a service uses an empty component segment;
//! identifiers can never be empty, so the encoding is collision-free.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used in the canonical string form.
const KEY_SEPARATOR: char = '#';

/// Identity of one component instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    /// Namespace of the service.
    pub namespace: String,

    /// Service name.
    pub service: String,

    /// Name of the matched context.
    pub context: String,

    /// Resolved allocation keys, in template order.
    pub keys: Vec<String>,

    /// Bundle name selected by the context.
    pub bundle: String,

    /// Component name; empty for the service (root) instance.
    pub component: String,
}

impl ComponentKey {
    /// Key of a service (root) instance.
    pub fn root(
        namespace: impl Into<String>,
        service: impl Into<String>,
        context: impl Into<String>,
        keys: Vec<String>,
        bundle: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            context: context.into(),
            keys,
            bundle: bundle.into(),
            component: String::new(),
        }
    }

    /// Same instance coordinates, for a named component.
    pub fn with_component(&self, component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..self.clone()
        }
    }

    /// The root key this component belongs to.
    pub fn root_key(&self) -> Self {
        self.with_component("")
    }

    pub fn is_root(&self) -> bool {
        self.component.is_empty()
    }

    /// Canonical string form; used as map key and plugin deploy name.
    pub fn as_string(&self) -> String {
        let mut parts = Vec::with_capacity(5 + self.keys.len());
        parts.push(self.namespace.as_str());
        parts.push(self.service.as_str());
        parts.push(self.context.as_str());
        for key in &self.keys {
            parts.push(key.as_str());
        }
        parts.push(self.bundle.as_str());
        parts.push(self.component.as_str());
        parts.join(&KEY_SEPARATOR.to_string())
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}
