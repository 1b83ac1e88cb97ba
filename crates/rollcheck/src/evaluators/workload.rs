//! Workload checks: pod readiness, deployment rollout, sidecar injection.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use super::{scope, Evaluator, Lookup, ProbeContext, Verdict};
use crate::control_plane::{decode_object, ControlPlane, QueryError, ResourceKind, ResourceQuery};

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("<unknown>")
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// (ready, total) over the pod's container statuses
fn container_counts(pod: &Pod) -> (usize, usize) {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();
    (statuses.iter().filter(|c| c.ready).count(), statuses.len())
}

/// Why each unready container is stuck, as indented detail lines
fn waiting_reasons(pod: &Pod) -> Vec<String> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();
    let mut lines = Vec::new();
    for waiting in statuses
        .iter()
        .filter(|c| !c.ready)
        .filter_map(|c| c.state.as_ref().and_then(|state| state.waiting.as_ref()))
    {
        lines.push(format!(
            "  -> Waiting reason: {}",
            waiting.reason.as_deref().unwrap_or("Unknown")
        ));
        if let Some(message) = waiting.message.as_deref().filter(|m| !m.is_empty()) {
            lines.push(format!("  -> Message: {}", message));
        }
    }
    lines
}

/// Running, with every container reporting ready
pub(crate) fn pod_is_ready(pod: &Pod) -> bool {
    let (ready, total) = container_counts(pod);
    pod_phase(pod) == "Running" && ready == total
}

pub(crate) async fn selected_pods(
    plane: &dyn ControlPlane,
    namespace: &str,
    selector: &str,
) -> Result<Vec<Pod>, QueryError> {
    let query = ResourceQuery::new(ResourceKind::Pod)
        .in_namespace(namespace)
        .with_selector(selector);
    plane.list(&query).await?.decode()
}

/// Every label-selected pod is running and ready
#[derive(Debug, Clone)]
pub struct PodReadiness {
    pub namespace: String,
    pub selector: String,
    /// Pass when nothing matches, for components that may not be installed
    pub optional: bool,
}

impl PodReadiness {
    pub fn new(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            selector: selector.into(),
            optional: false,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

#[async_trait]
impl Evaluator for PodReadiness {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let pods = match selected_pods(ctx.plane, &self.namespace, &self.selector).await {
            Ok(pods) => pods,
            Err(e) => return Verdict::query_failed("pods", &e),
        };

        if pods.is_empty() {
            let message = format!("No pods found matching {}", scope(&self.selector, &self.namespace));
            if self.optional {
                return Verdict::pass(format!("{} (not installed, nothing to check)", message));
            }
            return Verdict::fail(message);
        }

        let total = pods.len();
        let mut lagging = 0;
        let mut details = Vec::new();
        for pod in &pods {
            if !pod_is_ready(pod) {
                lagging += 1;
                let (ready, containers) = container_counts(pod);
                details.push(format!(
                    "Pod {}: phase {}, {}/{} containers ready",
                    pod_name(pod),
                    pod_phase(pod),
                    ready,
                    containers
                ));
                details.extend(waiting_reasons(pod));
            }
        }
        let ready = total - lagging;
        debug!("{}/{} pods ready for {}", ready, total, self.selector);

        if lagging == 0 {
            Verdict::pass(format!(
                "All {} pods for {} are running and ready",
                total, self.selector
            ))
        } else {
            Verdict::fail(format!(
                "{}/{} pods for {} are running and ready",
                ready, total, self.selector
            ))
            .with_details(details)
        }
    }
}

/// Every matched deployment has fully rolled out
#[derive(Debug, Clone)]
pub struct DeploymentRollout {
    pub namespace: String,
    pub lookup: Lookup,
}

impl DeploymentRollout {
    pub fn new(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lookup: Lookup::Selector(selector.into()),
        }
    }

    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lookup: Lookup::Named(name.into()),
        }
    }

    async fn deployments(&self, plane: &dyn ControlPlane) -> Result<Vec<Deployment>, Verdict> {
        match &self.lookup {
            Lookup::Named(name) => {
                let query = ResourceQuery::new(ResourceKind::Deployment)
                    .named(name.clone())
                    .in_namespace(self.namespace.clone());
                plane
                    .get(&query)
                    .await
                    .and_then(|value| decode_object(ResourceKind::Deployment, value))
                    .map(|deployment| vec![deployment])
                    .map_err(|e| Verdict::query_failed(&format!("Deployment {}", name), &e))
            }
            Lookup::Selector(selector) => {
                let query = ResourceQuery::new(ResourceKind::Deployment)
                    .in_namespace(self.namespace.clone())
                    .with_selector(selector.clone());
                let deployments: Vec<Deployment> = plane
                    .list(&query)
                    .await
                    .and_then(|s| s.decode())
                    .map_err(|e| Verdict::query_failed("deployments", &e))?;
                if deployments.is_empty() {
                    return Err(Verdict::fail(format!(
                        "No deployment found matching {}",
                        scope(selector, &self.namespace)
                    )));
                }
                Ok(deployments)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Rollout {
    desired: i32,
    ready: i32,
    updated: i32,
}

impl Rollout {
    fn of(deployment: &Deployment) -> Self {
        let status = deployment.status.as_ref();
        Self {
            desired: deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
        }
    }

    /// Zero desired replicas never counts as rolled out
    fn complete(&self) -> bool {
        self.desired > 0 && self.ready == self.desired && self.updated == self.desired
    }
}

#[async_trait]
impl Evaluator for DeploymentRollout {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let deployments = match self.deployments(ctx.plane).await {
            Ok(deployments) => deployments,
            Err(verdict) => return verdict,
        };

        let mut lines = Vec::new();
        let mut first_unready = None;
        for deployment in &deployments {
            let name = deployment.metadata.name.as_deref().unwrap_or("<unknown>");
            let rollout = Rollout::of(deployment);
            if rollout.complete() {
                lines.push(format!(
                    "Deployment {} is ready ({}/{} replicas)",
                    name, rollout.ready, rollout.desired
                ));
            } else {
                let line = format!(
                    "Deployment {} not ready: {}/{} ready, {}/{} updated",
                    name, rollout.ready, rollout.desired, rollout.updated, rollout.desired
                );
                if first_unready.is_none() {
                    first_unready = Some(line.clone());
                }
                lines.push(line);
            }
        }

        match (first_unready, lines.len()) {
            (None, 1) => Verdict::pass(lines.remove(0)),
            (None, n) => Verdict::pass(format!("All {} deployments are ready", n)).with_details(lines),
            (Some(message), 1) => Verdict::fail(message),
            (Some(message), _) => Verdict::fail(message).with_details(lines),
        }
    }
}

/// Evidence that a companion container was injected into a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarMarker {
    Container(String),
    Annotation { key: String, value: String },
}

impl SidecarMarker {
    fn matches(&self, pod: &Pod) -> bool {
        match self {
            SidecarMarker::Container(name) => pod
                .spec
                .as_ref()
                .map(|spec| spec.containers.iter().any(|c| &c.name == name))
                .unwrap_or(false),
            SidecarMarker::Annotation { key, value } => pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(key))
                .map(|actual| actual == value)
                .unwrap_or(false),
        }
    }

    fn describe(&self) -> String {
        match self {
            SidecarMarker::Container(name) => format!("container {}", name),
            SidecarMarker::Annotation { key, value } => format!("annotation {}={}", key, value),
        }
    }
}

/// Every selected pod carries the sidecar, by container name or annotation
#[derive(Debug, Clone)]
pub struct SidecarPresence {
    pub namespace: String,
    pub selector: String,
    /// Any one marker is enough
    pub markers: Vec<SidecarMarker>,
}

impl SidecarPresence {
    fn describe(&self) -> String {
        self.markers
            .iter()
            .map(SidecarMarker::describe)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

#[async_trait]
impl Evaluator for SidecarPresence {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let pods = match selected_pods(ctx.plane, &self.namespace, &self.selector).await {
            Ok(pods) => pods,
            Err(e) => return Verdict::query_failed("pods", &e),
        };

        if pods.is_empty() {
            return Verdict::fail(format!(
                "No pods found matching {}",
                scope(&self.selector, &self.namespace)
            ));
        }

        let total = pods.len();
        let mut carrying = 0;
        let mut details = Vec::with_capacity(total);
        for pod in &pods {
            let found = self.markers.iter().any(|m| m.matches(pod));
            if found {
                carrying += 1;
            }
            let (ready, containers) = container_counts(pod);
            details.push(format!(
                "Pod {}: phase {}, {}/{} containers ready, sidecar {}",
                pod_name(pod),
                pod_phase(pod),
                ready,
                containers,
                if found { "✓" } else { "✗" }
            ));
        }

        if carrying == total {
            Verdict::pass(format!(
                "Sidecar ({}) found in all {} pods for {}",
                self.describe(),
                total,
                self.selector
            ))
            .with_details(details)
        } else {
            Verdict::fail(format!(
                "Sidecar ({}) found in {}/{} pods for {}",
                self.describe(),
                carrying,
                total,
                self.selector
            ))
            .with_details(details)
        }
    }
}
