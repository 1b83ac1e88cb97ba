//! Control-Plane Query Adapter
//!
//! Read-only access to cluster objects. Two backends implement [`ControlPlane`]:
//! [`KubectlClient`] shells out to `kubectl ... -o json`, [`KubeApiClient`] talks
//! to the API server through `kube`. Both hand back raw JSON so the evaluators
//! see the same shapes regardless of where the data came from.

pub mod api;
pub mod kubectl;

pub use api::KubeApiClient;
pub use kubectl::KubectlClient;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Resource kinds the evaluators know how to judge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Node,
    Pod,
    Deployment,
    Service,
    StorageClass,
}

impl ResourceKind {
    /// Plural resource name as kubectl spells it
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Node => "nodes",
            ResourceKind::Pod => "pods",
            ResourceKind::Deployment => "deployments",
            ResourceKind::Service => "services",
            ResourceKind::StorageClass => "storageclasses",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Node | ResourceKind::StorageClass)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Node => write!(f, "node"),
            ResourceKind::Pod => write!(f, "pod"),
            ResourceKind::Deployment => write!(f, "deployment"),
            ResourceKind::Service => write!(f, "service"),
            ResourceKind::StorageClass => write!(f, "storageclass"),
        }
    }
}

/// One read-only query against the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub kind: ResourceKind,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub selector: Option<String>,
}

impl ResourceQuery {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            name: None,
            namespace: None,
            selector: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// Point-in-time view of a queried collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub kind: ResourceKind,
    pub items: Vec<Value>,
}

impl ResourceSnapshot {
    pub fn new(kind: ResourceKind, items: Vec<Value>) -> Self {
        Self { kind, items }
    }

    /// Decode every item into a typed Kubernetes object.
    pub fn decode<K: DeserializeOwned>(&self) -> Result<Vec<K>, QueryError> {
        self.items
            .iter()
            .cloned()
            .map(|item| decode_object(self.kind, item))
            .collect()
    }
}

pub fn decode_object<K: DeserializeOwned>(kind: ResourceKind, value: Value) -> Result<K, QueryError> {
    serde_json::from_value(value)
        .map_err(|e| QueryError::Malformed(format!("unexpected {} object: {}", kind, e)))
}

/// Command to run inside a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
}

/// What a command run inside a pod produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Command missing, spawn failure, timeout, or the API server is unreachable
    #[error("cannot reach control plane: {detail}")]
    Unavailable { status: Option<i32>, detail: String },
    #[error("not found: {stderr}")]
    NotFound { status: i32, stderr: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("query failed with exit status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
}

lazy_static! {
    static ref UNREACHABLE: Regex = Regex::new(
        r"(?i)unable to connect to the server|connection to the server .* was refused|connection refused|couldn't get current server api group list|no configuration has been provided|i/o timeout|no such host|tls handshake timeout"
    )
    .unwrap();
    static ref NOT_FOUND: Regex = Regex::new(r"(?i)\(NotFound\)|\bnot found\b").unwrap();
}

impl QueryError {
    /// Classify a non-zero exit of a control-plane command by its stderr.
    pub fn from_exit(status: i32, stderr: &str) -> Self {
        let stderr = stderr.trim().to_string();
        if UNREACHABLE.is_match(&stderr) {
            QueryError::Unavailable {
                status: Some(status),
                detail: stderr,
            }
        } else if NOT_FOUND.is_match(&stderr) {
            QueryError::NotFound { status, stderr }
        } else {
            QueryError::Failed { status, stderr }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueryError::Unavailable { .. })
    }
}

/// Read-only view of the cluster control plane
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Confirm the API server answers; returns its version string.
    async fn ping(&self) -> Result<String, QueryError>;

    /// List objects of one kind, optionally namespaced and label-filtered.
    async fn list(&self, query: &ResourceQuery) -> Result<ResourceSnapshot, QueryError>;

    /// Fetch a single named object.
    async fn get(&self, query: &ResourceQuery) -> Result<Value, QueryError>;

    /// Run a read-only command inside a pod. A non-zero exit of the command
    /// itself is reported through [`ExecOutput::status`], not as an error.
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput, QueryError>;
}
