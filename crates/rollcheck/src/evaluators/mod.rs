//! Resource Health Evaluators
//!
//! One evaluator per readiness dimension. Each captures only the identifiers
//! of what it judges (selector, service name, namespace) and receives its
//! collaborators through a [`ProbeContext`]. Evaluators never fail: every
//! query error is folded into a failing [`Verdict`].

pub mod cluster;
pub mod exec;
pub mod service;
pub mod storage;
pub mod workload;

pub use cluster::{ControlPlaneConnectivity, NodeReadiness, PodQuorum};
pub use exec::ExecProbe;
pub use service::{ContentMarkers, ExternalReachability, ServiceExists};
pub use storage::StorageClassPresence;
pub use workload::{DeploymentRollout, PodReadiness, SidecarMarker, SidecarPresence};

use async_trait::async_trait;

use crate::access::{HttpProbe, UrlResolver};
use crate::control_plane::{ControlPlane, QueryError};

/// How a single object is found: by exact name or by label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Named(String),
    Selector(String),
}

/// Collaborators shared by every evaluator of a run
#[derive(Clone, Copy)]
pub struct ProbeContext<'a> {
    pub plane: &'a dyn ControlPlane,
    pub resolver: &'a dyn UrlResolver,
    pub http: &'a HttpProbe,
}

/// Pass/fail plus diagnostics for one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub message: String,
    pub details: Vec<String>,
}

impl Verdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// Failing verdict for a query that never produced data.
    pub fn query_failed(what: &str, err: &QueryError) -> Self {
        let message = match err {
            QueryError::Unavailable { .. } => format!("Cannot query {}: {}", what, err),
            QueryError::NotFound { stderr, .. } => format!("{} not found ({})", what, stderr),
            QueryError::Malformed(_) => format!("Unreadable {} data: {}", what, err),
            QueryError::Failed { .. } => format!("Error getting {}: {}", what, err),
        };
        Self::fail(message)
    }
}

/// A single readiness predicate
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict;
}

/// Describe a label selector scope for messages.
pub(crate) fn scope(selector: &str, namespace: &str) -> String {
    format!("{} in namespace {}", selector, namespace)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Typed Kubernetes objects for evaluator tests

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateWaiting, ContainerStatus, Node, NodeCondition,
        NodeStatus, Pod, PodSpec, PodStatus, Service, ServiceSpec,
    };
    use k8s_openapi::api::storage::v1::StorageClass;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::Value;
    use std::collections::BTreeMap;

    use crate::access::{HttpProbe, MockUrlResolver};
    use crate::control_plane::{MockControlPlane, ResourceKind, ResourceSnapshot};

    use super::ProbeContext;

    pub fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn pod(name: &str, phase: &str, containers: &[(&str, bool)]) -> Value {
        let pod = Pod {
            metadata: meta(name),
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|(name, _)| Container {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(
                    containers
                        .iter()
                        .map(|(name, ready)| ContainerStatus {
                            name: name.to_string(),
                            ready: *ready,
                            image: "registry.local/app:1".to_string(),
                            image_id: String::new(),
                            restart_count: 0,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        };
        serde_json::to_value(pod).unwrap()
    }

    /// Pending pod whose only container is stuck waiting.
    pub fn waiting_pod(name: &str, container: &str, reason: &str, message: Option<&str>) -> Value {
        let mut value = pod(name, "Pending", &[(container, false)]);
        let state = ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: message.map(str::to_string),
            }),
            ..Default::default()
        };
        value["status"]["containerStatuses"][0]["state"] = serde_json::to_value(state).unwrap();
        value
    }

    pub fn storage_class(name: &str, is_default: bool) -> Value {
        let mut metadata = meta(name);
        if is_default {
            metadata.annotations = Some(BTreeMap::from([(
                "storageclass.kubernetes.io/is-default-class".to_string(),
                "true".to_string(),
            )]));
        }
        let class = StorageClass {
            metadata,
            provisioner: "k8s.io/minikube-hostpath".to_string(),
            ..Default::default()
        };
        serde_json::to_value(class).unwrap()
    }

    pub fn annotated_pod(name: &str, annotations: &[(&str, &str)], containers: &[(&str, bool)]) -> Value {
        let mut value = pod(name, "Running", containers);
        let map: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        value["metadata"]["annotations"] = serde_json::to_value(map).unwrap();
        value
    }

    pub fn node(name: &str, ready: Option<&str>) -> Value {
        let node = Node {
            metadata: meta(name),
            status: Some(NodeStatus {
                conditions: ready.map(|status| {
                    vec![NodeCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        serde_json::to_value(node).unwrap()
    }

    pub fn deployment(name: &str, desired: Option<i32>, ready: Option<i32>, updated: Option<i32>) -> Value {
        let deployment = Deployment {
            metadata: meta(name),
            spec: Some(DeploymentSpec {
                replicas: desired,
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: ready,
                updated_replicas: updated,
                ..Default::default()
            }),
        };
        serde_json::to_value(deployment).unwrap()
    }

    pub fn service(name: &str, type_: &str) -> Value {
        let service = Service {
            metadata: meta(name),
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                cluster_ip: Some("10.96.12.7".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        serde_json::to_value(service).unwrap()
    }

    /// Control plane that answers every list with `items`.
    pub fn listing(kind: ResourceKind, items: Vec<Value>) -> MockControlPlane {
        let mut plane = MockControlPlane::new();
        plane.expect_list().returning(move |query| {
            assert_eq!(query.kind, kind);
            Ok(ResourceSnapshot::new(kind, items.clone()))
        });
        plane
    }

    /// Owns the mocks so a borrowed [`ProbeContext`] can be handed out.
    pub struct Harness {
        pub plane: MockControlPlane,
        pub resolver: MockUrlResolver,
        pub http: HttpProbe,
    }

    impl Harness {
        pub fn new(plane: MockControlPlane) -> Self {
            Self {
                plane,
                resolver: MockUrlResolver::new(),
                http: HttpProbe::new(std::time::Duration::from_secs(2)).unwrap(),
            }
        }

        pub fn with_resolver(mut self, resolver: MockUrlResolver) -> Self {
            self.resolver = resolver;
            self
        }

        pub fn ctx(&self) -> ProbeContext<'_> {
            ProbeContext {
                plane: &self.plane,
                resolver: &self.resolver,
                http: &self.http,
            }
        }
    }
}
