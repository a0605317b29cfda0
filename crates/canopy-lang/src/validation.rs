//! Whole-policy validation
//!
//! Validation happens after all objects are added and before resolution.
//! Every problem found is accumulated, so one pass reports everything a
//! policy author needs to fix.

use crate::bundle::Bundle;
use crate::criteria::Criteria;
use crate::expression::ExpressionCache;
use crate::metadata::{is_identifier, Metadata};
use crate::policy::{Policy, PolicyNamespace};
use crate::rule::{Rule, RuleAction};
use crate::template::TemplateCache;
use std::collections::BTreeSet;
use std::fmt;

/// Types known to the plugin registry, needed to validate references.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub cluster_types: BTreeSet<String>,
    pub code_types: BTreeSet<String>,
}

impl ValidationContext {
    pub fn new(
        cluster_types: impl IntoIterator<Item = String>,
        code_types: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            cluster_types: cluster_types.into_iter().collect(),
            code_types: code_types.into_iter().collect(),
        }
    }
}

/// One validation finding, attached to the offending object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// `kind namespace/name` of the object.
    pub object: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.object, self.message)
    }
}

/// All validation findings for a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    pub issues: Vec<ValidationIssue>,
}

impl std::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "policy validation failed with {} issue(s):", self.issues.len())?;
        for issue in &self.issues {
            writeln!(f, "  - {issue}")?;
        }
        Ok(())
    }
}

struct Validator<'a> {
    policy: &'a Policy,
    ctx: &'a ValidationContext,
    expressions: ExpressionCache,
    templates: TemplateCache,
    issues: Vec<ValidationIssue>,
}

/// Validate a policy against the known plugin types.
pub fn validate(policy: &Policy, ctx: &ValidationContext) -> Result<(), ValidationErrors> {
    let mut validator = Validator {
        policy,
        ctx,
        expressions: ExpressionCache::new(),
        templates: TemplateCache::new(),
        issues: Vec::new(),
    };

    for (namespace, objects) in policy.namespaces() {
        validator.check_namespace(namespace, objects);
    }

    if validator.issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors {
            issues: validator.issues,
        })
    }
}

impl Validator<'_> {
    fn report(&mut self, kind: &str, metadata: &Metadata, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            object: format!("{} {}", kind, metadata.qualified_name()),
            message: message.into(),
        });
    }

    fn check_namespace(&mut self, namespace: &str, objects: &PolicyNamespace) {
        if !is_identifier(namespace) {
            self.issues.push(ValidationIssue {
                object: format!("namespace {namespace}"),
                message: "namespace is not a valid identifier".to_string(),
            });
        }

        for cluster in objects.clusters.values() {
            self.check_identifier("cluster", &cluster.metadata);
            if !self.ctx.cluster_types.contains(&cluster.cluster_type) {
                self.report(
                    "cluster",
                    &cluster.metadata,
                    format!("unknown cluster type '{}'", cluster.cluster_type),
                );
            }
        }

        for bundle in objects.bundles.values() {
            self.check_bundle(bundle);
        }

        for service in objects.services.values() {
            self.check_service(service);
        }

        for rule in objects.rules.values() {
            self.check_rule("rule", rule);
        }
        for rule in objects.acl_rules.values() {
            self.check_rule("acl-rule", rule);
        }

        for claim in objects.claims.values() {
            self.check_identifier("claim", &claim.metadata);
            let metadata = &claim.metadata;
            if self
                .policy
                .service(&claim.service, &metadata.namespace)
                .is_none()
            {
                self.report(
                    "claim",
                    metadata,
                    format!("references unknown service '{}'", claim.service),
                );
            }
        }
    }

    fn check_identifier(&mut self, kind: &str, metadata: &Metadata) {
        if !is_identifier(&metadata.name) {
            self.report(
                kind,
                metadata,
                format!("'{}' is not a valid identifier", metadata.name),
            );
        }
    }

    fn check_bundle(&mut self, bundle: &Bundle) {
        let metadata = &bundle.metadata;
        self.check_identifier("bundle", metadata);

        let mut seen = BTreeSet::new();
        for component in &bundle.components {
            if !is_identifier(&component.name) {
                self.report(
                    "bundle",
                    metadata,
                    format!("component '{}' is not a valid identifier", component.name),
                );
            }
            if !seen.insert(component.name.as_str()) {
                self.report(
                    "bundle",
                    metadata,
                    format!("duplicate component '{}'", component.name),
                );
            }

            if let Some(service) = &component.service {
                if self.policy.service(service, &metadata.namespace).is_none() {
                    self.report(
                        "bundle",
                        metadata,
                        format!(
                            "component '{}' references unknown service '{}'",
                            component.name, service
                        ),
                    );
                }
            }

            if let Some(code) = &component.code {
                if !self.ctx.code_types.contains(&code.code_type) {
                    self.report(
                        "bundle",
                        metadata,
                        format!(
                            "component '{}' has unknown code type '{}'",
                            component.name, code.code_type
                        ),
                    );
                }
            }

            if component.service.is_some() && component.code.is_some() {
                self.report(
                    "bundle",
                    metadata,
                    format!(
                        "component '{}' cannot have both code and a service link",
                        component.name
                    ),
                );
            }
        }

        if let Err(err) = bundle.components_topological() {
            self.report("bundle", metadata, err.to_string());
        }
    }

    fn check_service(&mut self, service: &crate::service::Service) {
        let metadata = &service.metadata;
        self.check_identifier("service", metadata);

        let mut seen = BTreeSet::new();
        for context in &service.contexts {
            if !is_identifier(&context.name) {
                self.report(
                    "service",
                    metadata,
                    format!("context '{}' is not a valid identifier", context.name),
                );
            }
            if !seen.insert(context.name.as_str()) {
                self.report(
                    "service",
                    metadata,
                    format!("duplicate context '{}'", context.name),
                );
            }

            if let Some(criteria) = &context.criteria {
                self.check_criteria("service", metadata, criteria);
            }

            if self
                .policy
                .bundle(&context.allocation.bundle, &metadata.namespace)
                .is_none()
            {
                self.report(
                    "service",
                    metadata,
                    format!(
                        "context '{}' references unknown bundle '{}'",
                        context.name, context.allocation.bundle
                    ),
                );
            }

            for key in &context.allocation.keys {
                if let Err(err) = self.templates.get_or_compile(key) {
                    self.report(
                        "service",
                        metadata,
                        format!("allocation key in context '{}': {}", context.name, err),
                    );
                }
            }
        }
    }

    fn check_rule(&mut self, kind: &str, rule: &Rule) {
        let metadata = &rule.metadata;
        self.check_identifier(kind, metadata);

        if let Some(criteria) = &rule.criteria {
            self.check_criteria(kind, metadata, criteria);
        }

        if rule.actions.is_empty() {
            self.report(kind, metadata, "rule has no actions");
        }

        for action in &rule.actions {
            match action {
                RuleAction::ClaimAction(target) => {
                    if self
                        .policy
                        .service(&target.service, &metadata.namespace)
                        .is_none()
                    {
                        self.report(
                            kind,
                            metadata,
                            format!("claim action references unknown service '{}'", target.service),
                        );
                    }
                }
                RuleAction::AddRole(grants) => {
                    if grants.is_empty() {
                        self.report(kind, metadata, "add-role action grants nothing");
                    }
                }
                _ => {}
            }
        }
    }

    fn check_criteria(&mut self, kind: &str, metadata: &Metadata, criteria: &Criteria) {
        if let Err(err) = criteria.compile(&self.expressions) {
            self.report(kind, metadata, err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Generation;

    fn known_types() -> ValidationContext {
        ValidationContext::new(
            ["kubernetes".to_string()],
            ["helm".to_string(), "k8s-raw".to_string()],
        )
    }

    fn policy_from(yaml: &str) -> Policy {
        let mut policy = Policy::new(Generation(1));
        policy.add_yaml(yaml).unwrap();
        policy
    }

    const VALID: &str = concat!(
        "kind: cluster\nmetadata:\n  namespace: system\n  name: us-east\ntype: kubernetes\n",
        "---\n",
        "kind: bundle\nmetadata:\n  namespace: main\n  name: web-stack\ncomponents:\n",
        "  - name: app\n    code:\n      type: helm\n      params:\n        chart: redis\n    dependencies: [db]\n",
        "  - name: db\n    code:\n      type: helm\n",
        "---\n",
        "kind: service\nmetadata:\n  namespace: main\n  name: web\ncontexts:\n",
        "  - name: base\n    criteria:\n      require-all:\n        - env == 'dev'\n",
        "    allocation:\n      bundle: web-stack\n      keys:\n        - \"{{ .Claim.Id }}\"\n",
        "---\n",
        "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: web\n",
    );

    #[test]
    fn valid_policy_passes() {
        assert!(validate(&policy_from(VALID), &known_types()).is_ok());
    }

    #[test]
    fn unknown_references_are_accumulated() {
        let yaml = concat!(
            "kind: service\nmetadata:\n  namespace: main\n  name: web\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: missing-bundle\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: missing-service\n",
        );
        let err = validate(&policy_from(yaml), &known_types()).unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert!(err.to_string().contains("missing-bundle"));
        assert!(err.to_string().contains("missing-service"));
    }

    #[test]
    fn component_cycle_is_reported() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: looped\ncomponents:\n",
            "  - name: a\n    dependencies: [b]\n",
            "  - name: b\n    dependencies: [a]\n",
        );
        let err = validate(&policy_from(yaml), &known_types()).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(err.to_string().contains("'a'"));
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn unknown_types_are_reported() {
        let yaml = concat!(
            "kind: cluster\nmetadata:\n  namespace: system\n  name: c\ntype: martian\n",
            "---\n",
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b\ncomponents:\n",
            "  - name: app\n    code:\n      type: cobol\n",
        );
        let err = validate(&policy_from(yaml), &known_types()).unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert!(err.to_string().contains("martian"));
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn bad_expressions_and_templates_are_reported() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b\ncomponents: []\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: web\ncontexts:\n",
            "  - name: base\n    criteria:\n      require-all:\n        - \"env == \"\n",
            "    allocation:\n      bundle: b\n      keys:\n        - \"{{ .Unclosed\"\n",
        );
        let err = validate(&policy_from(yaml), &known_types()).unwrap_err();
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn invalid_identifiers_are_reported() {
        let yaml = "kind: claim\nmetadata:\n  namespace: main\n  name: 9bad\nuser: u\nservice: web\n";
        let err = validate(&policy_from(yaml), &known_types()).unwrap_err();
        assert!(err
            .issues
            .iter()
            .any(|i| i.message.contains("not a valid identifier")));
    }
}
