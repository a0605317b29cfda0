//! The policy resolver
//!
//! Walks every enabled claim through the policy
//! (claim -> service -> context -> bundle -> components), computing
//! instance keys, labels, rendered parameters, and the instance graph.
//! Claims are processed in qualified-name order and every intermediate
//! structure is ordered, so resolution output is deterministic.
//!
//! Each claim resolves into its own staging resolution, merged into the
//! final one only on success; a failed claim leaves no partial instances
//! behind.

use crate::error::{Breadcrumb, ResolutionError};
use crate::external::ExternalData;
use crate::resolve::key::ComponentKey;
use crate::resolve::resolution::{ClaimStatus, Resolution};
use canopy_event::{fields, EventLog};
use canopy_lang::{
    apply_rules, resolve_reference, sort_rules, BundleTopologyError, Claim, ExpressionCache,
    LabelSet, Policy, Rule, TemplateCache, TemplateContext, Value,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Tunables for a resolution pass.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Default labels per namespace, weakest in the composition order.
    pub namespace_labels: BTreeMap<String, LabelSet>,

    /// Bound on rule-inserted claim recursion.
    pub max_rule_insertion_depth: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            namespace_labels: BTreeMap::new(),
            max_rule_insertion_depth: 32,
        }
    }
}

/// Per-claim state threaded through the service walk.
struct ClaimScope<'c> {
    claim: &'c Claim,
    user_labels: LabelSet,
}

/// Resolves (policy, claims, external data) into a [`Resolution`].
pub struct Resolver<'a> {
    policy: &'a Policy,
    external: &'a ExternalData,
    options: ResolverOptions,
    expressions: ExpressionCache,
    templates: TemplateCache,
    event_log: EventLog,
}

impl<'a> Resolver<'a> {
    pub fn new(policy: &'a Policy, external: &'a ExternalData, event_log: EventLog) -> Self {
        Self {
            policy,
            external,
            options: ResolverOptions::default(),
            expressions: ExpressionCache::new(),
            templates: TemplateCache::new(),
            event_log,
        }
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve every enabled claim.
    ///
    /// Per-claim failures are recorded in the resolution and do not abort
    /// the others.
    pub fn resolve(&self) -> Resolution {
        let mut resolution = Resolution::new(self.policy.revision());
        let rules = sort_rules(self.policy.rules());
        let claims = self.policy.claims();
        tracing::debug!(
            revision = %self.policy.revision(),
            claims = claims.len(),
            "resolving claims"
        );

        for claim in claims {
            match self.resolve_claim(claim, &rules) {
                Ok((staging, root)) => {
                    self.event_log.info(
                        fields([("claim", claim.id()), ("root", root.clone())]),
                        "claim resolved",
                    );
                    resolution.merge(staging);
                    resolution
                        .claims
                        .insert(claim.id(), ClaimStatus::Resolved { root });
                }
                Err(err) => {
                    self.event_log
                        .warn(fields([("claim", claim.id())]), err.to_string());
                    resolution.claims.insert(
                        claim.id(),
                        ClaimStatus::Failed {
                            error: err.to_string(),
                        },
                    );
                }
            }
        }

        resolution
    }

    fn resolve_claim(
        &self,
        claim: &Claim,
        rules: &[&Rule],
    ) -> Result<(Resolution, String), ResolutionError> {
        let breadcrumb = Breadcrumb::new(claim.id(), &claim.service);

        let user_labels = self.external.user_labels(&claim.user).map_err(|err| {
            ResolutionError::UserLoad {
                breadcrumb: breadcrumb.clone(),
                user: claim.user.clone(),
                message: err.to_string(),
            }
        })?;

        let defaults = self
            .options
            .namespace_labels
            .get(&claim.metadata.namespace)
            .cloned()
            .unwrap_or_default();
        let base = defaults.merged(&claim.labels).merged(&user_labels);

        let scope = ClaimScope {
            claim,
            user_labels,
        };

        let outcome = apply_rules(rules.iter().copied(), &base, &self.expressions)
            .map_err(|err| ResolutionError::Expression {
                breadcrumb: breadcrumb.clone(),
                message: err.to_string(),
            })?;
        if let Some(rule) = outcome.rejected_by {
            return Err(ResolutionError::RejectedByRule { breadcrumb, rule });
        }

        let mut staging = Resolution::default();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        seen.insert(resolve_reference(&claim.service, &claim.metadata.namespace));

        let mut queue: VecDeque<(String, LabelSet, usize)> = VecDeque::new();
        for inserted in &outcome.inserted_claims {
            if seen.insert(resolve_reference(inserted, &claim.metadata.namespace)) {
                queue.push_back((inserted.clone(), outcome.labels.clone(), 1));
            }
        }

        let mut stack = Vec::new();
        let root = self.resolve_service(
            &scope,
            &claim.service,
            &claim.metadata.namespace,
            outcome.labels,
            &mut staging,
            &mut stack,
        )?;

        // Rule-inserted claims, breadth-first and bounded.
        while let Some((service_ref, labels, depth)) = queue.pop_front() {
            if depth > self.options.max_rule_insertion_depth {
                return Err(ResolutionError::RuleInsertionDepthExceeded {
                    breadcrumb: Breadcrumb::new(claim.id(), &service_ref),
                    depth: self.options.max_rule_insertion_depth,
                });
            }

            let outcome = apply_rules(rules.iter().copied(), &labels, &self.expressions)
                .map_err(|err| ResolutionError::Expression {
                    breadcrumb: Breadcrumb::new(claim.id(), &service_ref),
                    message: err.to_string(),
                })?;
            if let Some(rule) = outcome.rejected_by {
                // Denied inserted claims are dropped, not fatal.
                self.event_log.info(
                    fields([
                        ("claim", claim.id()),
                        ("service", service_ref.clone()),
                        ("rule", rule),
                    ]),
                    "rule-inserted claim rejected",
                );
                continue;
            }
            for inserted in &outcome.inserted_claims {
                if seen.insert(resolve_reference(inserted, &claim.metadata.namespace)) {
                    queue.push_back((inserted.clone(), outcome.labels.clone(), depth + 1));
                }
            }

            let mut stack = Vec::new();
            self.resolve_service(
                &scope,
                &service_ref,
                &claim.metadata.namespace,
                outcome.labels,
                &mut staging,
                &mut stack,
            )?;
        }

        Ok((staging, root.as_string()))
    }

    fn resolve_service(
        &self,
        scope: &ClaimScope<'_>,
        service_ref: &str,
        default_namespace: &str,
        labels: LabelSet,
        staging: &mut Resolution,
        stack: &mut Vec<String>,
    ) -> Result<ComponentKey, ResolutionError> {
        let (service_ns, service_name) = resolve_reference(service_ref, default_namespace);
        let qualified = format!("{service_ns}/{service_name}");
        let breadcrumb = Breadcrumb::new(scope.claim.id(), &qualified);

        let Some(service) = self.policy.service(service_ref, default_namespace) else {
            return Err(ResolutionError::MissingReference {
                breadcrumb,
                reference: service_ref.to_string(),
            });
        };

        let mut labels = labels;
        if let Some(ops) = &service.labels {
            labels.apply(ops);
        }

        // First matching context wins, in declaration order.
        let mut selected = None;
        for context in &service.contexts {
            let matches = match &context.criteria {
                Some(criteria) => criteria
                    .matches(&labels, &self.expressions)
                    .map_err(|err| ResolutionError::Expression {
                        breadcrumb: breadcrumb.clone().with_context(&context.name),
                        message: err.to_string(),
                    })?,
                None => true,
            };
            if matches {
                selected = Some(context);
                break;
            }
        }
        let Some(context) = selected else {
            return Err(ResolutionError::NoMatchingContext { breadcrumb });
        };
        let breadcrumb = breadcrumb.with_context(&context.name);

        if let Some(ops) = &context.change_labels {
            labels.apply(ops);
        }

        // Allocation keys, each seeing the keys rendered before it.
        let mut keys: Vec<String> = Vec::with_capacity(context.allocation.keys.len());
        for template in &context.allocation.keys {
            let ctx = self.template_context(scope, &labels, &keys, None);
            let compiled =
                self.templates
                    .get_or_compile(template)
                    .map_err(|err| ResolutionError::Template {
                        breadcrumb: breadcrumb.clone(),
                        message: err.to_string(),
                    })?;
            let rendered = compiled.render(&ctx);
            if rendered.is_empty() {
                return Err(ResolutionError::Template {
                    breadcrumb: breadcrumb.clone(),
                    message: format!("allocation key '{template}' rendered empty"),
                });
            }
            keys.push(rendered);
        }

        let Some(bundle) = self.policy.bundle(&context.allocation.bundle, &service_ns) else {
            return Err(ResolutionError::MissingReference {
                breadcrumb,
                reference: context.allocation.bundle.clone(),
            });
        };

        let root = ComponentKey::root(
            &service_ns,
            &service_name,
            &context.name,
            keys.clone(),
            &bundle.metadata.name,
        );
        let root_string = root.as_string();
        let breadcrumb = breadcrumb.with_key(&root_string);

        if stack.contains(&root_string) {
            return Err(ResolutionError::ServiceCycle {
                breadcrumb,
                service: qualified,
            });
        }
        stack.push(root_string);

        {
            let instance = staging.instance_mut(&root);
            if instance.claim_ids.is_empty() {
                instance.labels = labels.clone();
            }
            instance.claim_ids.insert(scope.claim.id());
        }

        let order = bundle
            .components_topological()
            .map_err(|err| match &err {
                BundleTopologyError::Cycle { .. } => ResolutionError::BundleCycle {
                    breadcrumb: breadcrumb.clone(),
                    message: err.to_string(),
                },
                BundleTopologyError::MissingDependency { dependency, .. } => {
                    ResolutionError::MissingReference {
                        breadcrumb: breadcrumb.clone(),
                        reference: dependency.clone(),
                    }
                }
            })?
            .to_vec();

        let mut discovery: BTreeMap<String, Value> = BTreeMap::new();
        for name in &order {
            let Some(component) = bundle.component(name) else {
                continue;
            };
            let component_key = root.with_component(name);
            let component_breadcrumb = Breadcrumb {
                key: Some(component_key.as_string()),
                ..breadcrumb.clone()
            };

            let ctx = self.template_context(scope, &labels, &keys, Some(&discovery));
            let discovery_params = component
                .discovery
                .render(&ctx, &self.templates)
                .map_err(|err| ResolutionError::Template {
                    breadcrumb: component_breadcrumb.clone(),
                    message: err.to_string(),
                })?;

            let mut code_type = None;
            let mut code_params = Value::Null;
            if let Some(code) = &component.code {
                code_type = Some(code.code_type.clone());
                code_params =
                    code.params
                        .render(&ctx, &self.templates)
                        .map_err(|err| ResolutionError::Template {
                            breadcrumb: component_breadcrumb.clone(),
                            message: err.to_string(),
                        })?;
            }

            {
                let instance = staging.instance_mut(&component_key);
                if instance.claim_ids.is_empty() {
                    instance.labels = labels.clone();
                    instance.code_type = code_type;
                    instance.code_params = code_params;
                    instance.discovery_params = discovery_params.clone();
                }
                instance.claim_ids.insert(scope.claim.id());
            }

            staging.add_edge(&component_key, &root);
            for dependency in &component.dependencies {
                staging.add_edge(&component_key, &root.with_component(dependency));
            }

            if let Some(target) = &component.service {
                let target_root = self.resolve_service(
                    scope,
                    target,
                    &service_ns,
                    labels.clone(),
                    staging,
                    stack,
                )?;
                staging.add_edge(&component_key, &target_root);
            }

            discovery.insert(name.clone(), discovery_params);
        }

        stack.pop();
        Ok(root)
    }

    fn template_context(
        &self,
        scope: &ClaimScope<'_>,
        labels: &LabelSet,
        keys: &[String],
        discovery: Option<&BTreeMap<String, Value>>,
    ) -> TemplateContext {
        let claim = scope.claim;
        let claim_value: Value = [
            ("Id".to_string(), Value::from(claim.id())),
            ("Name".to_string(), Value::from(claim.metadata.name.clone())),
            (
                "Namespace".to_string(),
                Value::from(claim.metadata.namespace.clone()),
            ),
            ("User".to_string(), Value::from(claim.user.clone())),
        ]
        .into_iter()
        .collect();

        let user_value: Value = [
            ("Id".to_string(), Value::from(claim.user.clone())),
            ("Labels".to_string(), labels_value(&scope.user_labels)),
        ]
        .into_iter()
        .collect();

        let mut ctx = TemplateContext::new()
            .with("Claim", claim_value)
            .with("User", user_value)
            .with("Labels", labels_value(labels))
            .with(
                "Keys",
                Value::List(keys.iter().map(|k| Value::from(k.clone())).collect()),
            );
        if let Some(discovery) = discovery {
            ctx.insert("Discovery", Value::Map(discovery.clone()));
        }
        ctx
    }
}

fn labels_value(labels: &LabelSet) -> Value {
    Value::Map(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{StaticSecretLoader, StaticUserLoader};
    use canopy_lang::Generation;
    use std::sync::Arc;

    fn external() -> ExternalData {
        ExternalData::new(
            Arc::new(
                StaticUserLoader::new()
                    .with_user("alice", [("env", "dev"), ("team", "core")].into_iter().collect()),
            ),
            Arc::new(StaticSecretLoader::new()),
        )
    }

    fn policy(yaml: &str) -> Policy {
        let mut policy = Policy::new(Generation(1));
        policy.add_yaml(yaml).unwrap();
        policy
    }

    const SINGLE_SERVICE: &str = concat!(
        "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents:\n",
        "  - name: c1\n    code:\n      type: helm\n      params:\n        chart: redis\n",
        "---\n",
        "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
        "  - name: cx1\n    allocation:\n      bundle: b1\n      keys:\n        - \"{{ .Claim.Name }}\"\n",
        "---\n",
        "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
    );

    #[test]
    fn resolves_single_service_claim() {
        let policy = policy(SINGLE_SERVICE);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        assert_eq!(resolution.len(), 2);
        let root = resolution.instance("main#s1#cx1#cl1#b1#").unwrap();
        let component = resolution.instance("main#s1#cx1#cl1#b1#c1").unwrap();

        assert!(root.claim_ids.contains("main/cl1"));
        assert_eq!(component.code_type.as_deref(), Some("helm"));
        assert_eq!(
            component.code_params.get("chart").and_then(Value::as_str),
            Some("redis")
        );
        assert!(component.edges_out.contains("main#s1#cx1#cl1#b1#"));
        assert_eq!(
            resolution.claims["main/cl1"],
            ClaimStatus::Resolved {
                root: "main#s1#cx1#cl1#b1#".to_string()
            }
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let policy = policy(SINGLE_SERVICE);
        let external = external();
        let a = Resolver::new(&policy, &external, EventLog::new()).resolve();
        let b = Resolver::new(&policy, &external, EventLog::new()).resolve();
        assert_eq!(a.to_yaml().unwrap(), b.to_yaml().unwrap());
    }

    #[test]
    fn no_matching_context_is_recorded_per_claim() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents: []\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: prod-only\n    criteria:\n      require-all:\n        - env == 'prod'\n",
            "    allocation:\n      bundle: b1\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        assert!(resolution.is_empty());
        match &resolution.claims["main/cl1"] {
            ClaimStatus::Failed { error } => assert!(error.contains("no matching context")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn context_selection_follows_declaration_order() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents: []\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: dev\n    criteria:\n      require-all:\n        - env == 'dev'\n",
            "    allocation:\n      bundle: b1\n      keys: [\"{{ .Claim.Name }}\"]\n",
            "  - name: fallback\n    allocation:\n      bundle: b1\n      keys: [\"{{ .Claim.Name }}\"]\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();
        assert!(resolution.instance("main#s1#dev#cl1#b1#").is_some());
    }

    #[test]
    fn cross_service_links_create_edges_to_target_root() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: app-bundle\ncomponents:\n",
            "  - name: app\n    code:\n      type: helm\n",
            "  - name: db-link\n    service: db\n",
            "---\n",
            "kind: bundle\nmetadata:\n  namespace: main\n  name: db-bundle\ncomponents:\n",
            "  - name: postgres\n    code:\n      type: helm\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: app\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: app-bundle\n      keys: [\"{{ .Claim.Name }}\"]\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: db\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: db-bundle\n      keys: [shared]\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: app\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        let link = resolution.instance("main#app#base#cl1#app-bundle#db-link").unwrap();
        assert!(link.edges_out.contains("main#db#base#shared#db-bundle#"));

        // Nested service instances carry the inducing claim id.
        let db_root = resolution.instance("main#db#base#shared#db-bundle#").unwrap();
        assert!(db_root.claim_ids.contains("main/cl1"));
        assert_eq!(resolution.find_cycle(), None);
    }

    #[test]
    fn service_cycles_fail_the_claim() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: a-bundle\ncomponents:\n",
            "  - name: to-b\n    service: b\n",
            "---\n",
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b-bundle\ncomponents:\n",
            "  - name: to-a\n    service: a\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: a\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: a-bundle\n      keys: [x]\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: b\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: b-bundle\n      keys: [x]\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: a\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        assert!(resolution.is_empty());
        match &resolution.claims["main/cl1"] {
            ClaimStatus::Failed { error } => assert!(error.contains("service cycle")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn rules_place_and_reject_claims() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents:\n",
            "  - name: c1\n    code:\n      type: helm\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: b1\n      keys: [\"{{ .Claim.Name }}\"]\n",
            "---\n",
            "kind: rule\nmetadata:\n  namespace: main\n  name: place-dev\nweight: 10\n",
            "criteria:\n  require-all:\n    - env == 'dev'\n",
            "actions:\n  - change-labels:\n      set:\n        cluster: system/minikube\n",
            "---\n",
            "kind: rule\nmetadata:\n  namespace: main\n  name: ban-interns\nweight: 100\n",
            "criteria:\n  require-all:\n    - team == 'interns'\n",
            "actions:\n  - reject\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl2\nuser: eve\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = ExternalData::new(
            Arc::new(
                StaticUserLoader::new()
                    .with_user("alice", [("env", "dev")].into_iter().collect())
                    .with_user("eve", [("env", "dev"), ("team", "interns")].into_iter().collect()),
            ),
            Arc::new(StaticSecretLoader::new()),
        );
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        let component = resolution.instance("main#s1#base#cl1#b1#c1").unwrap();
        assert_eq!(component.cluster(), Some("system/minikube"));
        assert!(component.claim_ids.contains("main/cl1"));
        assert!(!component.claim_ids.contains("main/cl2"));

        match &resolution.claims["main/cl2"] {
            ClaimStatus::Failed { error } => assert!(error.contains("rejected by rule")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn rule_inserted_claims_resolve_alongside() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents:\n",
            "  - name: c1\n    code:\n      type: helm\n",
            "---\n",
            "kind: bundle\nmetadata:\n  namespace: main\n  name: mon-bundle\ncomponents:\n",
            "  - name: agent\n    code:\n      type: helm\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: b1\n      keys: [\"{{ .Claim.Name }}\"]\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: monitoring\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: mon-bundle\n      keys: [shared]\n",
            "---\n",
            "kind: rule\nmetadata:\n  namespace: main\n  name: add-monitoring\nweight: 5\n",
            "actions:\n  - claim-action:\n      service: monitoring\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        assert!(resolution.instance("main#s1#base#cl1#b1#c1").is_some());
        let agent = resolution.instance("main#monitoring#base#shared#mon-bundle#agent");
        assert!(agent.is_some());
        assert!(agent.unwrap().claim_ids.contains("main/cl1"));
    }

    #[test]
    fn discovery_of_siblings_feeds_code_params() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents:\n",
            "  - name: app\n    code:\n      type: helm\n      params:\n        db_url: \"{{ .Discovery.db.url }}\"\n",
            "    dependencies: [db]\n",
            "  - name: db\n    code:\n      type: helm\n    discovery:\n      url: \"postgres://{{ .Labels.env }}\"\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: b1\n      keys: [\"{{ .Claim.Name }}\"]\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        let app = resolution.instance("main#s1#base#cl1#b1#app").unwrap();
        assert_eq!(
            app.code_params.get("db_url").and_then(Value::as_str),
            Some("postgres://dev")
        );
        assert!(app
            .edges_out
            .contains("main#s1#base#cl1#b1#db"));
    }

    #[test]
    fn allocation_keys_see_prior_keys() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents: []\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: b1\n",
            "      keys:\n        - \"{{ .Labels.env }}\"\n        - \"{{ .Keys.0 }}-suffix\"\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();
        assert!(resolution.instance("main#s1#base#dev#dev-suffix#b1#").is_some());
    }

    #[test]
    fn two_claims_on_one_instance_union_claim_ids() {
        let yaml = concat!(
            "kind: bundle\nmetadata:\n  namespace: main\n  name: b1\ncomponents:\n",
            "  - name: c1\n    code:\n      type: helm\n",
            "---\n",
            "kind: service\nmetadata:\n  namespace: main\n  name: s1\ncontexts:\n",
            "  - name: base\n    allocation:\n      bundle: b1\n      keys: [shared]\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl1\nuser: alice\nservice: s1\n",
            "---\n",
            "kind: claim\nmetadata:\n  namespace: main\n  name: cl2\nuser: alice\nservice: s1\n",
        );
        let policy = policy(yaml);
        let external = external();
        let resolution = Resolver::new(&policy, &external, EventLog::new()).resolve();

        assert_eq!(resolution.len(), 2);
        let root = resolution.instance("main#s1#base#shared#b1#").unwrap();
        assert_eq!(root.claim_ids.len(), 2);
    }
}
