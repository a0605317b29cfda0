//! The apply engine
//!
//! Walks an action plan in happens-before order, executing independent
//! branches in parallel. Concurrency is bounded by a global worker pool
//! and by the registry's per-cluster cap. Each successful action commits
//! its change to actual state immediately; a failed action marks its
//! transitive dependents skipped and the rest of the plan continues.
//! Panics inside plugin calls are recovered with stack context and
//! recorded as internal errors.

use crate::actual::StateUpdater;
use crate::diff::{Action, Plan};
use crate::error::{ApplyError, PlanError};
use crate::external::ExternalData;
use crate::progress::Progress;
use crate::resolve::{ComponentInstance, Resolution};
use canopy_event::{fields, EventLog, Fields};
use canopy_lang::{Cluster, Policy};
use canopy_plugin::{EndpointMap, PluginRegistry};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

thread_local! {
    /// Backtrace stashed by the panic hook, consumed on the same thread by
    /// the unwind boundary around each action.
    static PANIC_BACKTRACE: RefCell<Option<String>> = RefCell::new(None);
}

static PANIC_HOOK: Once = Once::new();

/// Install the process-wide hook that captures a backtrace at the panic
/// site, so recovered panics carry stack context.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture().to_string());
            });
            previous(info);
        }));
    });
}

/// Everything an action needs while executing.
pub struct ApplyContext {
    pub desired_policy: Arc<Policy>,
    pub desired: Arc<Resolution>,

    /// Snapshot of actual state when the plan was computed; deletes read
    /// their parameters from here.
    pub actual_snapshot: Resolution,

    pub updater: Arc<dyn StateUpdater>,
    pub external: ExternalData,
    pub registry: Arc<PluginRegistry>,
    pub event_log: EventLog,
}

/// Apply tunables.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Global worker pool size.
    pub max_concurrency: usize,

    /// Deadline propagated to every plugin call.
    pub deadline: Option<Instant>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            deadline: None,
        }
    }
}

/// Terminal state of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ActionOutcome {
    Success,
    Failed { error: String },
    Skipped { reason: String },
}

/// One action plus its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action: Action,
    pub outcome: ActionOutcome,
}

/// Result of one apply invocation.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Actual state after all commits.
    pub actual: Resolution,

    /// Per-action results, by action id.
    pub records: BTreeMap<String, ActionRecord>,

    /// Whether the invocation was cancelled by its deadline.
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Success))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Skipped { .. }))
    }

    /// Aggregate error: present iff any action failed or was skipped.
    pub fn error(&self) -> Option<ApplyError> {
        if self.cancelled {
            return Some(ApplyError::Cancelled {
                completed: self.succeeded(),
                total: self.records.len(),
            });
        }
        let failed = self.failed();
        let skipped = self.skipped();
        if failed > 0 || skipped > 0 {
            return Some(ApplyError::ActionsFailed { failed, skipped });
        }
        None
    }

    fn count(&self, matcher: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.records
            .values()
            .filter(|r| matcher(&r.outcome))
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Create,
    Update,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Destroy => write!(f, "destroy"),
        }
    }
}

/// Executes one action plan against the plugin registry and state store.
pub struct ApplyEngine {
    context: Arc<ApplyContext>,
    plan: Plan,
    options: ApplyOptions,
    progress: Progress,
}

impl ApplyEngine {
    pub fn new(context: ApplyContext, plan: Plan) -> Self {
        Self {
            context: Arc::new(context),
            plan,
            options: ApplyOptions::default(),
            progress: Progress::new(),
        }
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle for observing progress while the apply runs.
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Execute the plan.
    ///
    /// Per-action failures never halt the plan; the report carries every
    /// outcome plus the post-apply actual state.
    pub async fn apply(self) -> Result<ApplyReport, PlanError> {
        // Validate the partial order up front.
        self.plan.execution_order()?;
        install_panic_hook();

        let total = self.plan.len();
        self.progress.set_total(total);
        tracing::debug!(
            actions = total,
            workers = self.options.max_concurrency,
            "executing action plan"
        );

        let dependents = self.plan.dependents();
        let mut indegree: BTreeMap<String, usize> = BTreeMap::new();
        for (id, _) in self.plan.actions() {
            let count = self
                .plan
                .dependencies_of(id)
                .iter()
                .filter(|p| self.plan.contains(p))
                .count();
            indegree.insert(id.clone(), count);
        }

        let mut ready: BTreeSet<(u8, String)> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .filter_map(|(id, _)| self.plan.get(id).map(|a| (a.rank(), id.clone())))
            .collect();

        let mut records: BTreeMap<String, ActionRecord> = BTreeMap::new();
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut join_set: JoinSet<Result<(), ApplyError>> = JoinSet::new();
        let workers = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut cancelled = false;

        loop {
            if let Some(deadline) = self.options.deadline {
                if !cancelled && Instant::now() >= deadline {
                    cancelled = true;
                    self.context.event_log.warn(
                        Fields::new(),
                        "apply deadline reached; no further actions will be scheduled",
                    );
                }
            }

            if !cancelled {
                while let Some(entry) = ready.iter().next().cloned() {
                    ready.remove(&entry);
                    let (_, id) = entry;
                    let Some(action) = self.plan.get(&id).cloned() else {
                        continue;
                    };
                    let context = self.context.clone();
                    let workers = workers.clone();
                    let deadline = self.options.deadline;
                    let handle = join_set.spawn(async move {
                        let _permit = workers.acquire_owned().await.map_err(|_| {
                            ApplyError::Internal {
                                action: action.id(),
                                message: "worker pool closed".to_string(),
                            }
                        })?;
                        // Plugin calls are untrusted: recover panics on the
                        // panicking thread, where the hook's backtrace is.
                        match AssertUnwindSafe(execute_action(&context, &action, deadline))
                            .catch_unwind()
                            .await
                        {
                            Ok(result) => result,
                            Err(payload) => Err(ApplyError::Internal {
                                action: action.id(),
                                message: describe_panic(payload),
                            }),
                        }
                    });
                    running.insert(handle.id(), id);
                }
            }

            if running.is_empty() {
                break;
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(join_err) => {
                    let task_id = join_err.id();
                    let action = running.get(&task_id).cloned().unwrap_or_default();
                    (
                        task_id,
                        Err(ApplyError::Internal {
                            action,
                            message: panic_message(join_err),
                        }),
                    )
                }
            };
            let Some(action_id) = running.remove(&task_id) else {
                continue;
            };
            let Some(action) = self.plan.get(&action_id).cloned() else {
                continue;
            };
            self.progress.advance();

            match outcome {
                Ok(()) => {
                    records.insert(
                        action_id.clone(),
                        ActionRecord {
                            action,
                            outcome: ActionOutcome::Success,
                        },
                    );
                    if let Some(next) = dependents.get(&action_id) {
                        for dependent in next {
                            if !self.plan.contains(dependent)
                                || records.contains_key(dependent)
                            {
                                continue;
                            }
                            let Some(count) = indegree.get_mut(dependent) else {
                                continue;
                            };
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                if let Some(a) = self.plan.get(dependent) {
                                    ready.insert((a.rank(), dependent.clone()));
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    self.context.event_log.error(
                        fields([("action", action_id.clone())]),
                        err.to_string(),
                    );
                    records.insert(
                        action_id.clone(),
                        ActionRecord {
                            action,
                            outcome: ActionOutcome::Failed {
                                error: err.to_string(),
                            },
                        },
                    );
                    self.skip_dependents(&action_id, &dependents, &mut records);
                }
            }
        }

        // Whatever was never scheduled (cancellation) is skipped.
        for (id, action) in self.plan.actions() {
            if !records.contains_key(id) {
                records.insert(
                    id.clone(),
                    ActionRecord {
                        action: action.clone(),
                        outcome: ActionOutcome::Skipped {
                            reason: "apply cancelled".to_string(),
                        },
                    },
                );
                self.progress.advance();
            }
        }

        self.context.registry.cleanup(&self.context.event_log).await;

        let failed = records
            .values()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed { .. }))
            .count();
        self.progress.finish(failed == 0 && !cancelled);

        let actual = self
            .context
            .updater
            .actual_state()
            .await
            .map_err(|err| PlanError::Inconsistent(err.to_string()))?;

        Ok(ApplyReport {
            actual,
            records,
            cancelled,
        })
    }

    fn skip_dependents(
        &self,
        failed: &str,
        dependents: &BTreeMap<String, BTreeSet<String>>,
        records: &mut BTreeMap<String, ActionRecord>,
    ) {
        let mut queue = VecDeque::from([failed.to_string()]);
        while let Some(id) = queue.pop_front() {
            let Some(next) = dependents.get(&id) else {
                continue;
            };
            for dependent in next {
                if records.contains_key(dependent) {
                    continue;
                }
                let Some(action) = self.plan.get(dependent) else {
                    continue;
                };
                records.insert(
                    dependent.clone(),
                    ActionRecord {
                        action: action.clone(),
                        outcome: ActionOutcome::Skipped {
                            reason: format!("prerequisite '{id}' did not complete"),
                        },
                    },
                );
                self.progress.advance();
                queue.push_back(dependent.clone());
            }
        }
    }
}

/// Render a recovered panic payload with the backtrace stashed by the
/// panic hook. The stash is thread-local, so this only yields stack
/// context when called on the thread that panicked.
fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    let message = if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "non-string panic payload".to_string()
    };

    match PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take()) {
        Some(backtrace) => format!("panic: {message}\nstack backtrace:\n{backtrace}"),
        None => format!("panic: {message}"),
    }
}

/// Fallback for panics that escape the per-action unwind boundary; the
/// backtrace stash lives on the worker thread, so only the payload
/// message is available here.
fn panic_message(err: JoinError) -> String {
    if err.is_panic() {
        return describe_panic(err.into_panic());
    }
    err.to_string()
}

async fn execute_action(
    context: &ApplyContext,
    action: &Action,
    deadline: Option<Instant>,
) -> Result<(), ApplyError> {
    let action_error = |message: String| ApplyError::Action {
        action: action.id(),
        message,
    };

    match action {
        Action::CreateComponent { key } => {
            let instance = context
                .desired
                .instance(key)
                .ok_or_else(|| action_error("not present in desired state".to_string()))?;
            let committed = deploy(context, instance, Operation::Create, deadline, action).await?;
            context
                .updater
                .create(committed)
                .await
                .map_err(|err| action_error(err.to_string()))
        }

        Action::UpdateComponent { key } => {
            let instance = context
                .desired
                .instance(key)
                .ok_or_else(|| action_error("not present in desired state".to_string()))?;
            let committed = deploy(context, instance, Operation::Update, deadline, action).await?;
            context
                .updater
                .update(committed)
                .await
                .map_err(|err| action_error(err.to_string()))
        }

        Action::DeleteComponent { key } => {
            // Destroy with the parameters recorded in actual state.
            if let Some(instance) = context.actual_snapshot.instance(key) {
                deploy(context, instance, Operation::Destroy, deadline, action).await?;
            }
            context
                .updater
                .delete(key)
                .await
                .map_err(|err| action_error(err.to_string()))
        }

        Action::AttachClaim { key, claim } => {
            let mut instance = context
                .updater
                .get(key)
                .await
                .map_err(|err| action_error(err.to_string()))?
                .ok_or_else(|| action_error("not present in actual state".to_string()))?;
            instance.claim_ids.insert(claim.clone());
            context
                .updater
                .update(instance)
                .await
                .map_err(|err| action_error(err.to_string()))
        }

        Action::DetachClaim { key, claim } => {
            let mut instance = context
                .updater
                .get(key)
                .await
                .map_err(|err| action_error(err.to_string()))?
                .ok_or_else(|| action_error("not present in actual state".to_string()))?;
            instance.claim_ids.remove(claim);
            context
                .updater
                .update(instance)
                .await
                .map_err(|err| action_error(err.to_string()))
        }

        Action::UpdatePolicyRevision { revision } => context
            .updater
            .update_revision(*revision)
            .await
            .map_err(|err| action_error(err.to_string())),
    }
}

/// Run the plugin side of a create/update/destroy and return the instance
/// to commit. Instances without code (service roots) commit state only.
async fn deploy(
    context: &ApplyContext,
    instance: &ComponentInstance,
    operation: Operation,
    deadline: Option<Instant>,
    action: &Action,
) -> Result<ComponentInstance, ApplyError> {
    let mut committed = instance.clone();
    let Some(code_type) = instance.code_type.clone() else {
        return Ok(committed);
    };

    let cluster = placement_cluster(context, instance, action)?;
    let permits = context
        .registry
        .cluster_permits(&cluster.metadata.qualified_name());
    let _cluster_permit = permits
        .acquire_owned()
        .await
        .map_err(|_| ApplyError::Internal {
            action: action.id(),
            message: "cluster permit pool closed".to_string(),
        })?;

    let plugin = context
        .registry
        .code_plugin(cluster, &code_type, &context.event_log)
        .await
        .map_err(|err| ApplyError::Action {
            action: action.id(),
            message: err.to_string(),
        })?;

    let deploy_name = instance.deploy_name();
    let call = async {
        match operation {
            Operation::Create => {
                plugin
                    .create(&deploy_name, &instance.code_params, &context.event_log)
                    .await
            }
            Operation::Update => {
                plugin
                    .update(&deploy_name, &instance.code_params, &context.event_log)
                    .await
            }
            Operation::Destroy => {
                plugin
                    .destroy(&deploy_name, &instance.code_params, &context.event_log)
                    .await
            }
        }
    };
    let result = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| ApplyError::DeadlineExceeded { action: action.id() })?,
        None => call.await,
    };
    result.map_err(|err| ApplyError::Action {
        action: action.id(),
        message: err.to_string(),
    })?;

    context.event_log.info(
        fields([
            ("deploy", deploy_name.clone()),
            ("operation", operation.to_string()),
            ("cluster", cluster.metadata.qualified_name()),
        ]),
        "component deployed",
    );

    // Persist endpoints discovered right after a successful create/update.
    if matches!(operation, Operation::Create | Operation::Update) {
        match plugin.endpoints(&deploy_name, &instance.code_params).await {
            Ok(endpoints) => committed.endpoints = endpoints,
            Err(err) => context.event_log.warn(
                fields([("deploy", deploy_name)]),
                format!("endpoint discovery failed: {err}"),
            ),
        }
    }

    Ok(committed)
}

fn placement_cluster<'a>(
    context: &'a ApplyContext,
    instance: &ComponentInstance,
    action: &Action,
) -> Result<&'a Cluster, ApplyError> {
    let cluster_name = instance.cluster().ok_or_else(|| ApplyError::Action {
        action: action.id(),
        message: format!(
            "instance '{}' has no cluster label; placement rules did not run",
            instance.key
        ),
    })?;
    context
        .desired_policy
        .cluster(cluster_name, &instance.key.namespace)
        .ok_or_else(|| ApplyError::Action {
            action: action.id(),
            message: format!("unknown cluster '{cluster_name}'"),
        })
}

/// Re-fetch endpoints for an instance on demand, persisting the refresh.
pub async fn refresh_endpoints(
    context: &ApplyContext,
    key: &str,
) -> Result<EndpointMap, ApplyError> {
    let not_found = || ApplyError::Action {
        action: format!("endpoints#{key}"),
        message: "not present in actual state".to_string(),
    };
    let mut instance = context
        .updater
        .get(key)
        .await
        .map_err(|err| ApplyError::Action {
            action: format!("endpoints#{key}"),
            message: err.to_string(),
        })?
        .ok_or_else(not_found)?;

    let Some(code_type) = instance.code_type.clone() else {
        return Ok(EndpointMap::new());
    };
    let probe = Action::UpdateComponent {
        key: key.to_string(),
    };
    let cluster = placement_cluster(context, &instance, &probe)?;
    let plugin = context
        .registry
        .code_plugin(cluster, &code_type, &context.event_log)
        .await
        .map_err(|err| ApplyError::Action {
            action: format!("endpoints#{key}"),
            message: err.to_string(),
        })?;

    let endpoints = plugin
        .endpoints(&instance.deploy_name(), &instance.code_params)
        .await
        .map_err(|err| ApplyError::Action {
            action: format!("endpoints#{key}"),
            message: err.to_string(),
        })?;

    instance.endpoints = endpoints.clone();
    context
        .updater
        .update(instance)
        .await
        .map_err(|err| ApplyError::Action {
            action: format!("endpoints#{key}"),
            message: err.to_string(),
        })?;
    Ok(endpoints)
}
