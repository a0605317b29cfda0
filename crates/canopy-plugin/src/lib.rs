//! Canopy plugin contracts
//!
//! The apply engine talks to clouds exclusively through these traits.
//! A *cluster plugin* owns the connection to one cluster; a *code plugin*
//! knows how to deploy one kind of code (helm charts, raw manifests, ...)
//! into a cluster. The registry caches instantiated plugins for the
//! lifetime of a revision and owns all locking, including the per-cluster
//! concurrency cap.

#![deny(unsafe_code)]

pub mod mock;
pub mod registry;

use async_trait::async_trait;
use canopy_event::EventLog;
use canopy_lang::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use registry::{ClusterPluginFactory, CodePluginFactory, PluginRegistry};

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised by plugins or the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("no cluster plugin registered for cluster type '{0}'")]
    UnknownClusterType(String),

    #[error("no code plugin registered for code type '{0}'")]
    UnknownCodeType(String),

    #[error("cluster '{cluster}' failed to initialize: {message}")]
    InitFailed { cluster: String, message: String },

    #[error("plugin operation failed: {0}")]
    OperationFailed(String),
}

/// Endpoints exposed by a deployed component: port name to URL.
pub type EndpointMap = BTreeMap<String, String>;

/// Tabular snapshot of the live resources backing a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResourceSnapshot {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }
}

/// Connection to one cluster.
///
/// Implementations must be safe to share across tasks; `init` is invoked
/// through the registry's one-shot guard, so its body runs at most once
/// per revision.
#[async_trait]
pub trait ClusterPlugin: Send + Sync {
    /// Prepare the cluster connection. Idempotent, once per revision.
    async fn init(&self, event_log: &EventLog) -> PluginResult<()>;

    /// Endpoints currently exposed for a deployment in this cluster.
    async fn endpoints(&self, deploy_name: &str) -> PluginResult<EndpointMap>;

    /// Live resources backing a deployment in this cluster.
    async fn resources(&self, deploy_name: &str) -> PluginResult<ResourceSnapshot>;
}

/// Deployment driver for one code type within a cluster.
///
/// `deploy_name` is the canonical string form of the component instance
/// key. Implementations must tolerate concurrent calls for *distinct*
/// deploy names; the registry serializes nothing beyond the per-cluster
/// concurrency cap.
#[async_trait]
pub trait CodePlugin: Send + Sync {
    async fn create(
        &self,
        deploy_name: &str,
        params: &Value,
        event_log: &EventLog,
    ) -> PluginResult<()>;

    async fn update(
        &self,
        deploy_name: &str,
        params: &Value,
        event_log: &EventLog,
    ) -> PluginResult<()>;

    async fn destroy(
        &self,
        deploy_name: &str,
        params: &Value,
        event_log: &EventLog,
    ) -> PluginResult<()>;

    async fn endpoints(&self, deploy_name: &str, params: &Value) -> PluginResult<EndpointMap>;

    async fn resources(&self, deploy_name: &str, params: &Value) -> PluginResult<ResourceSnapshot>;

    /// Release any resources held by the plugin after a revision completes.
    async fn cleanup(&self) -> PluginResult<()>;
}
