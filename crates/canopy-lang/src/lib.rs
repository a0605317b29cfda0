//! Canopy policy language
//!
//! The declarative model operators publish and consumers claim against:
//! clusters, bundles of code components, services with conditional
//! contexts, weighted rules, and claims. This crate owns the label set and
//! expression/template machinery, the indexed policy revision, and
//! whole-policy validation.
//!
//! The resolution, diff, and apply engines live in `canopy-engine`; plugin
//! contracts live in `canopy-plugin`.

#![deny(unsafe_code)]

pub mod bundle;
pub mod claim;
pub mod cluster;
pub mod criteria;
pub mod expression;
pub mod labels;
pub mod metadata;
pub mod policy;
pub mod rule;
pub mod service;
pub mod template;
pub mod validation;
pub mod value;

pub use bundle::{Bundle, BundleComponent, BundleTopologyError, Code};
pub use claim::Claim;
pub use cluster::Cluster;
pub use criteria::Criteria;
pub use expression::{Expression, ExpressionCache, ExpressionError};
pub use labels::{LabelOperations, LabelSet};
pub use metadata::{is_identifier, resolve_reference, Generation, Metadata};
pub use policy::{Policy, PolicyError, PolicyNamespace, PolicyObject};
pub use rule::{
    apply_rules, resolve_roles, sort_rules, ClaimTarget, Decision, RoleMap, Rule, RuleAction,
    RuleOutcome,
};
pub use service::{Allocation, Service, ServiceContext};
pub use template::{Template, TemplateCache, TemplateContext, TemplateError};
pub use validation::{validate, ValidationContext, ValidationErrors, ValidationIssue};
pub use value::Value;
