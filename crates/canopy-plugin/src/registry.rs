//! Plugin registry: factories, cached instances, and concurrency caps
//!
//! Plugins are instantiated lazily, cached for the lifetime of the
//! registry (one revision), and initialized through a one-shot guard: the
//! first caller runs the init body, everyone else blocks and observes the
//! stored result. The registry also hands out the per-cluster semaphore
//! the apply engine uses to cap concurrent plugin calls.

use crate::{ClusterPlugin, CodePlugin, PluginError, PluginResult};
use canopy_event::{fields, EventLog};
use canopy_lang::Cluster;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Builds cluster plugins for one cluster type.
pub trait ClusterPluginFactory: Send + Sync {
    fn cluster_type(&self) -> &str;

    fn instantiate(&self, cluster: &Cluster) -> PluginResult<Arc<dyn ClusterPlugin>>;
}

/// Builds code plugins for one code type.
pub trait CodePluginFactory: Send + Sync {
    fn code_type(&self) -> &str;

    fn instantiate(
        &self,
        cluster: &Cluster,
        cluster_plugin: Arc<dyn ClusterPlugin>,
    ) -> PluginResult<Arc<dyn CodePlugin>>;
}

/// One-shot init state for a cluster plugin.
enum InitState {
    Pending,
    Done,
    Failed(String),
}

struct ClusterEntry {
    plugin: Arc<dyn ClusterPlugin>,
    init: tokio::sync::Mutex<InitState>,
}

/// Registry of plugin factories and cached plugin instances.
pub struct PluginRegistry {
    cluster_factories: BTreeMap<String, Arc<dyn ClusterPluginFactory>>,
    code_factories: BTreeMap<String, Arc<dyn CodePluginFactory>>,
    max_concurrent_per_cluster: usize,

    clusters: Mutex<HashMap<String, Arc<ClusterEntry>>>,
    code_plugins: Mutex<HashMap<(String, String), Arc<dyn CodePlugin>>>,
    permits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl PluginRegistry {
    pub const DEFAULT_CLUSTER_CONCURRENCY: usize = 4;

    pub fn new() -> Self {
        Self {
            cluster_factories: BTreeMap::new(),
            code_factories: BTreeMap::new(),
            max_concurrent_per_cluster: Self::DEFAULT_CLUSTER_CONCURRENCY,
            clusters: Mutex::new(HashMap::new()),
            code_plugins: Mutex::new(HashMap::new()),
            permits: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cluster_factory(mut self, factory: Arc<dyn ClusterPluginFactory>) -> Self {
        self.cluster_factories
            .insert(factory.cluster_type().to_string(), factory);
        self
    }

    pub fn with_code_factory(mut self, factory: Arc<dyn CodePluginFactory>) -> Self {
        self.code_factories
            .insert(factory.code_type().to_string(), factory);
        self
    }

    pub fn with_cluster_concurrency(mut self, max: usize) -> Self {
        self.max_concurrent_per_cluster = max.max(1);
        self
    }

    /// Cluster types for which a factory is registered.
    pub fn cluster_types(&self) -> BTreeSet<String> {
        self.cluster_factories.keys().cloned().collect()
    }

    /// Code types for which a factory is registered.
    pub fn code_types(&self) -> BTreeSet<String> {
        self.code_factories.keys().cloned().collect()
    }

    /// Cached, initialized cluster plugin for a cluster.
    ///
    /// The first caller instantiates and initializes the plugin; concurrent
    /// callers block on the init guard and observe the stored result.
    pub async fn cluster_plugin(
        &self,
        cluster: &Cluster,
        event_log: &EventLog,
    ) -> PluginResult<Arc<dyn ClusterPlugin>> {
        let entry = self.cluster_entry(cluster)?;

        let mut init = entry.init.lock().await;
        match &*init {
            InitState::Done => {}
            InitState::Failed(message) => {
                return Err(PluginError::InitFailed {
                    cluster: cluster.metadata.qualified_name(),
                    message: message.clone(),
                })
            }
            InitState::Pending => match entry.plugin.init(event_log).await {
                Ok(()) => {
                    event_log.debug(
                        fields([("cluster", cluster.metadata.qualified_name())]),
                        "cluster plugin initialized",
                    );
                    *init = InitState::Done;
                }
                Err(err) => {
                    let message = err.to_string();
                    *init = InitState::Failed(message.clone());
                    return Err(PluginError::InitFailed {
                        cluster: cluster.metadata.qualified_name(),
                        message,
                    });
                }
            },
        }

        Ok(entry.plugin.clone())
    }

    /// Cached code plugin for a (cluster, code type) pair.
    ///
    /// Ensures the backing cluster plugin is initialized first.
    pub async fn code_plugin(
        &self,
        cluster: &Cluster,
        code_type: &str,
        event_log: &EventLog,
    ) -> PluginResult<Arc<dyn CodePlugin>> {
        let cluster_plugin = self.cluster_plugin(cluster, event_log).await?;

        let key = (cluster.metadata.qualified_name(), code_type.to_string());
        if let Some(found) = self.code_plugins.lock().unwrap().get(&key) {
            return Ok(found.clone());
        }

        let factory = self
            .code_factories
            .get(code_type)
            .ok_or_else(|| PluginError::UnknownCodeType(code_type.to_string()))?;
        let plugin = factory.instantiate(cluster, cluster_plugin)?;

        Ok(self
            .code_plugins
            .lock()
            .unwrap()
            .entry(key)
            .or_insert(plugin)
            .clone())
    }

    /// The semaphore capping concurrent plugin calls for one cluster.
    pub fn cluster_permits(&self, cluster_name: &str) -> Arc<Semaphore> {
        self.permits
            .lock()
            .unwrap()
            .entry(cluster_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent_per_cluster)))
            .clone()
    }

    /// Run the cleanup phase on every instantiated code plugin.
    ///
    /// Failures are logged but never fatal.
    pub async fn cleanup(&self, event_log: &EventLog) {
        let plugins: Vec<_> = self
            .code_plugins
            .lock()
            .unwrap()
            .iter()
            .map(|((cluster, code_type), plugin)| {
                (cluster.clone(), code_type.clone(), plugin.clone())
            })
            .collect();

        for (cluster, code_type, plugin) in plugins {
            if let Err(err) = plugin.cleanup().await {
                event_log.warn(
                    fields([("cluster", cluster), ("code_type", code_type)]),
                    format!("plugin cleanup failed: {err}"),
                );
            }
        }
    }

    fn cluster_entry(&self, cluster: &Cluster) -> PluginResult<Arc<ClusterEntry>> {
        let mut clusters = self.clusters.lock().unwrap();
        if let Some(found) = clusters.get(&cluster.metadata.qualified_name()) {
            return Ok(found.clone());
        }

        let factory = self
            .cluster_factories
            .get(&cluster.cluster_type)
            .ok_or_else(|| PluginError::UnknownClusterType(cluster.cluster_type.clone()))?;
        let entry = Arc::new(ClusterEntry {
            plugin: factory.instantiate(cluster)?,
            init: tokio::sync::Mutex::new(InitState::Pending),
        });
        clusters.insert(cluster.metadata.qualified_name(), entry.clone());
        Ok(entry)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClusterPluginFactory, MockCodePluginFactory};
    use canopy_lang::{Metadata, Value};

    fn cluster() -> Cluster {
        Cluster {
            metadata: Metadata::new("system", "us-east"),
            cluster_type: "kubernetes".to_string(),
            config: Value::Null,
        }
    }

    fn registry() -> (PluginRegistry, Arc<MockClusterPluginFactory>, Arc<MockCodePluginFactory>) {
        let cluster_factory = Arc::new(MockClusterPluginFactory::new("kubernetes"));
        let code_factory = Arc::new(MockCodePluginFactory::new("helm"));
        let registry = PluginRegistry::new()
            .with_cluster_factory(cluster_factory.clone())
            .with_code_factory(code_factory.clone());
        (registry, cluster_factory, code_factory)
    }

    #[tokio::test]
    async fn init_runs_once_per_cluster() {
        let (registry, cluster_factory, _) = registry();
        let log = EventLog::new();

        registry.cluster_plugin(&cluster(), &log).await.unwrap();
        registry.cluster_plugin(&cluster(), &log).await.unwrap();
        registry
            .code_plugin(&cluster(), "helm", &log)
            .await
            .unwrap();

        assert_eq!(cluster_factory.plugin().init_count(), 1);
    }

    #[tokio::test]
    async fn code_plugins_are_cached_per_cluster_and_type() {
        let (registry, _, _) = registry();
        let log = EventLog::new();

        let a = registry.code_plugin(&cluster(), "helm", &log).await.unwrap();
        let b = registry.code_plugin(&cluster(), "helm", &log).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unknown_types_are_errors() {
        let (registry, _, _) = registry();
        let log = EventLog::new();

        let mut other = cluster();
        other.cluster_type = "martian".to_string();
        assert!(matches!(
            registry.cluster_plugin(&other, &log).await,
            Err(PluginError::UnknownClusterType(_))
        ));
        assert!(matches!(
            registry.code_plugin(&cluster(), "cobol", &log).await,
            Err(PluginError::UnknownCodeType(_))
        ));
    }

    #[tokio::test]
    async fn failed_init_is_observed_by_later_callers() {
        let cluster_factory = Arc::new(MockClusterPluginFactory::new("kubernetes"));
        cluster_factory.plugin().fail_init();
        let registry = PluginRegistry::new().with_cluster_factory(cluster_factory.clone());
        let log = EventLog::new();

        assert!(registry.cluster_plugin(&cluster(), &log).await.is_err());
        assert!(registry.cluster_plugin(&cluster(), &log).await.is_err());
        assert_eq!(cluster_factory.plugin().init_count(), 1);
    }

    #[tokio::test]
    async fn permits_are_shared_per_cluster() {
        let (registry, _, _) = registry();
        let a = registry.cluster_permits("system/us-east");
        let b = registry.cluster_permits("system/us-east");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            a.available_permits(),
            PluginRegistry::DEFAULT_CLUSTER_CONCURRENCY
        );
    }
}
