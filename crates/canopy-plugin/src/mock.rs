//! Mock plugins for engine and registry tests

use crate::{
    ClusterPlugin, ClusterPluginFactory, CodePlugin, CodePluginFactory, EndpointMap, PluginError,
    PluginResult, ResourceSnapshot,
};
use async_trait::async_trait;
use canopy_event::EventLog;
use canopy_lang::{Cluster, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded plugin invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: String,
    pub deploy_name: String,
}

/// Cluster plugin that counts initializations.
#[derive(Debug, Default)]
pub struct MockClusterPlugin {
    init_count: AtomicUsize,
    fail_init: AtomicBool,
}

impl MockClusterPlugin {
    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// Make every subsequent init invocation fail.
    pub fn fail_init(&self) {
        self.fail_init.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterPlugin for MockClusterPlugin {
    async fn init(&self, _event_log: &EventLog) -> PluginResult<()> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(PluginError::OperationFailed("mock init failure".to_string()));
        }
        Ok(())
    }

    async fn endpoints(&self, _deploy_name: &str) -> PluginResult<EndpointMap> {
        Ok(EndpointMap::new())
    }

    async fn resources(&self, _deploy_name: &str) -> PluginResult<ResourceSnapshot> {
        Ok(ResourceSnapshot::default())
    }
}

/// Factory handing out one shared [`MockClusterPlugin`].
pub struct MockClusterPluginFactory {
    cluster_type: String,
    plugin: Arc<MockClusterPlugin>,
}

impl MockClusterPluginFactory {
    pub fn new(cluster_type: impl Into<String>) -> Self {
        Self {
            cluster_type: cluster_type.into(),
            plugin: Arc::new(MockClusterPlugin::default()),
        }
    }

    pub fn plugin(&self) -> Arc<MockClusterPlugin> {
        self.plugin.clone()
    }
}

impl ClusterPluginFactory for MockClusterPluginFactory {
    fn cluster_type(&self) -> &str {
        &self.cluster_type
    }

    fn instantiate(&self, _cluster: &Cluster) -> PluginResult<Arc<dyn ClusterPlugin>> {
        Ok(self.plugin.clone())
    }
}

/// Code plugin that records calls and can be told to fail, panic, or stall.
#[derive(Debug, Default)]
pub struct MockCodePlugin {
    calls: Mutex<Vec<MockCall>>,
    fail_deploys: Mutex<BTreeSet<String>>,
    panic_deploys: Mutex<BTreeSet<String>>,
    endpoints: Mutex<EndpointMap>,
    latency: Mutex<Option<Duration>>,
}

impl MockCodePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail create/update/destroy for this deploy name.
    pub fn fail_on(&self, deploy_name: impl Into<String>) {
        self.fail_deploys.lock().unwrap().insert(deploy_name.into());
    }

    /// Panic inside create/update/destroy for this deploy name.
    pub fn panic_on(&self, deploy_name: impl Into<String>) {
        self.panic_deploys.lock().unwrap().insert(deploy_name.into());
    }

    /// Endpoints returned for every deployment.
    pub fn set_endpoints(&self, endpoints: EndpointMap) {
        *self.endpoints.lock().unwrap() = endpoints;
    }

    /// Sleep this long inside every mutating call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// All recorded calls, in invocation order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Deploy names recorded for one operation.
    pub fn deploys_for(&self, operation: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.deploy_name.clone())
            .collect()
    }

    async fn invoke(&self, operation: &str, deploy_name: &str) -> PluginResult<()> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.calls.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            deploy_name: deploy_name.to_string(),
        });

        if self.panic_deploys.lock().unwrap().contains(deploy_name) {
            panic!("mock plugin panic for '{deploy_name}'");
        }
        if self.fail_deploys.lock().unwrap().contains(deploy_name) {
            return Err(PluginError::OperationFailed(format!(
                "mock failure for '{deploy_name}'"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CodePlugin for MockCodePlugin {
    async fn create(
        &self,
        deploy_name: &str,
        _params: &Value,
        _event_log: &EventLog,
    ) -> PluginResult<()> {
        self.invoke("create", deploy_name).await
    }

    async fn update(
        &self,
        deploy_name: &str,
        _params: &Value,
        _event_log: &EventLog,
    ) -> PluginResult<()> {
        self.invoke("update", deploy_name).await
    }

    async fn destroy(
        &self,
        deploy_name: &str,
        _params: &Value,
        _event_log: &EventLog,
    ) -> PluginResult<()> {
        self.invoke("destroy", deploy_name).await
    }

    async fn endpoints(&self, _deploy_name: &str, _params: &Value) -> PluginResult<EndpointMap> {
        Ok(self.endpoints.lock().unwrap().clone())
    }

    async fn resources(&self, deploy_name: &str, _params: &Value) -> PluginResult<ResourceSnapshot> {
        let mut snapshot = ResourceSnapshot::new(vec!["deploy".to_string()]);
        snapshot.push_row(vec![deploy_name.to_string()]);
        Ok(snapshot)
    }

    async fn cleanup(&self) -> PluginResult<()> {
        self.calls.lock().unwrap().push(MockCall {
            operation: "cleanup".to_string(),
            deploy_name: String::new(),
        });
        Ok(())
    }
}

/// Factory handing out one shared [`MockCodePlugin`] for every cluster.
pub struct MockCodePluginFactory {
    code_type: String,
    plugin: Arc<MockCodePlugin>,
}

impl MockCodePluginFactory {
    pub fn new(code_type: impl Into<String>) -> Self {
        Self {
            code_type: code_type.into(),
            plugin: Arc::new(MockCodePlugin::new()),
        }
    }

    pub fn plugin(&self) -> Arc<MockCodePlugin> {
        self.plugin.clone()
    }
}

impl CodePluginFactory for MockCodePluginFactory {
    fn code_type(&self) -> &str {
        &self.code_type
    }

    fn instantiate(
        &self,
        _cluster: &Cluster,
        _cluster_plugin: Arc<dyn ClusterPlugin>,
    ) -> PluginResult<Arc<dyn CodePlugin>> {
        Ok(self.plugin.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let plugin = MockCodePlugin::new();
        let log = EventLog::new();
        plugin.create("a", &Value::Null, &log).await.unwrap();
        plugin.destroy("b", &Value::Null, &log).await.unwrap();

        let calls = plugin.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, "create");
        assert_eq!(calls[1].deploy_name, "b");
    }

    #[tokio::test]
    async fn configured_failures_fail() {
        let plugin = MockCodePlugin::new();
        plugin.fail_on("bad");
        let log = EventLog::new();

        assert!(plugin.create("good", &Value::Null, &log).await.is_ok());
        assert!(plugin.create("bad", &Value::Null, &log).await.is_err());
    }
}
