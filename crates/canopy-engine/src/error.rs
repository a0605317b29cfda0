//! Engine error taxonomy
//!
//! Resolution errors are terminal for the affected claim; plan errors are
//! terminal for the revision; apply errors are recorded per action and
//! never halt the plan.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where in the resolution walk an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub claim: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Breadcrumb {
    pub fn new(claim: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            service: service.into(),
            context: None,
            key: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "claim '{}', service '{}'", self.claim, self.service)?;
        if let Some(context) = &self.context {
            write!(f, ", context '{context}'")?;
        }
        if let Some(key) = &self.key {
            write!(f, ", key '{key}'")?;
        }
        Ok(())
    }
}

/// Per-claim resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no matching context ({breadcrumb})")]
    NoMatchingContext { breadcrumb: Breadcrumb },

    #[error("template error ({breadcrumb}): {message}")]
    Template {
        breadcrumb: Breadcrumb,
        message: String,
    },

    #[error("expression error ({breadcrumb}): {message}")]
    Expression {
        breadcrumb: Breadcrumb,
        message: String,
    },

    #[error("bundle cycle ({breadcrumb}): {message}")]
    BundleCycle {
        breadcrumb: Breadcrumb,
        message: String,
    },

    #[error("service cycle through '{service}' ({breadcrumb})")]
    ServiceCycle {
        breadcrumb: Breadcrumb,
        service: String,
    },

    #[error("missing reference '{reference}' ({breadcrumb})")]
    MissingReference {
        breadcrumb: Breadcrumb,
        reference: String,
    },

    #[error("rejected by rule '{rule}' ({breadcrumb})")]
    RejectedByRule {
        breadcrumb: Breadcrumb,
        rule: String,
    },

    #[error("rule-inserted claims exceeded depth {depth} ({breadcrumb})")]
    RuleInsertionDepthExceeded {
        breadcrumb: Breadcrumb,
        depth: usize,
    },

    #[error("cannot load user '{user}' ({breadcrumb}): {message}")]
    UserLoad {
        breadcrumb: Breadcrumb,
        user: String,
        message: String,
    },
}

/// Inconsistencies between desired and actual that cannot be reconciled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("action plan is not a DAG: cycle through '{0}'")]
    Cycle(String),

    #[error("actual state inconsistent: {0}")]
    Inconsistent(String),
}

/// Per-action and aggregate apply failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("action '{action}' failed: {message}")]
    Action { action: String, message: String },

    #[error("action '{action}' exceeded the apply deadline")]
    DeadlineExceeded { action: String },

    #[error("internal error in action '{action}': {message}")]
    Internal { action: String, message: String },

    #[error("{failed} action(s) failed, {skipped} skipped")]
    ActionsFailed { failed: usize, skipped: usize },

    #[error("apply cancelled after {completed} of {total} action(s)")]
    Cancelled { completed: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadcrumb_display_is_progressive() {
        let breadcrumb = Breadcrumb::new("main/cl1", "main/web")
            .with_context("dev")
            .with_key("main#web#dev#k#b#");
        let text = breadcrumb.to_string();
        assert!(text.contains("claim 'main/cl1'"));
        assert!(text.contains("context 'dev'"));
        assert!(text.contains("key 'main#web#dev#k#b#'"));
    }

    #[test]
    fn errors_carry_breadcrumbs() {
        let err = ResolutionError::NoMatchingContext {
            breadcrumb: Breadcrumb::new("main/cl1", "main/web"),
        };
        assert!(err.to_string().contains("main/web"));
    }
}
