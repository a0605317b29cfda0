//! Cluster objects

use crate::metadata::Metadata;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A target cluster where component instances can be deployed.
///
/// The config is opaque to the core and handed verbatim to the cluster
/// plugin matching `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: Metadata,

    #[serde(rename = "type")]
    pub cluster_type: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}
