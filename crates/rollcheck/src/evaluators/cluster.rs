//! Cluster-wide checks: API connectivity, node readiness, system pod quorum.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::debug;

use super::{Evaluator, ProbeContext, Verdict};
use crate::control_plane::{ResourceKind, ResourceQuery};

/// Passes when the API server answers at all
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneConnectivity;

#[async_trait]
impl Evaluator for ControlPlaneConnectivity {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        match ctx.plane.ping().await {
            Ok(version) => Verdict::pass(format!("Control plane is reachable (server {})", version)),
            Err(e) => Verdict::fail(format!("Cannot connect to the control plane: {}", e)),
        }
    }
}

/// Every node must carry `Ready=True`
#[derive(Debug, Clone, Default)]
pub struct NodeReadiness {
    pub selector: Option<String>,
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|condition| condition.status == "True")
        .unwrap_or(false)
}

#[async_trait]
impl Evaluator for NodeReadiness {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let mut query = ResourceQuery::new(ResourceKind::Node);
        if let Some(selector) = &self.selector {
            query = query.with_selector(selector.clone());
        }

        let nodes: Vec<Node> = match ctx.plane.list(&query).await.and_then(|s| s.decode()) {
            Ok(nodes) => nodes,
            Err(e) => return Verdict::query_failed("nodes", &e),
        };

        if nodes.is_empty() {
            return Verdict::fail("No nodes found");
        }

        let total = nodes.len();
        let not_ready: Vec<String> = nodes
            .iter()
            .filter(|node| !node_is_ready(node))
            .map(|node| format!("Node {} is not ready", node.metadata.name.as_deref().unwrap_or("<unknown>")))
            .collect();
        let ready = total - not_ready.len();
        debug!("{}/{} nodes ready", ready, total);

        if not_ready.is_empty() {
            Verdict::pass(format!("All {} nodes are ready", total))
        } else {
            Verdict::fail(format!("{}/{} nodes are ready", ready, total)).with_details(not_ready)
        }
    }
}

/// A share of the pods in a namespace must be running or completed
#[derive(Debug, Clone)]
pub struct PodQuorum {
    pub namespace: String,
    pub selector: Option<String>,
    /// Fraction in (0, 1]
    pub min_ratio: f64,
}

impl PodQuorum {
    pub fn new(namespace: impl Into<String>, min_ratio: f64) -> Self {
        Self {
            namespace: namespace.into(),
            selector: None,
            min_ratio,
        }
    }
}

#[async_trait]
impl Evaluator for PodQuorum {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let mut query = ResourceQuery::new(ResourceKind::Pod).in_namespace(self.namespace.clone());
        if let Some(selector) = &self.selector {
            query = query.with_selector(selector.clone());
        }

        let pods: Vec<Pod> = match ctx.plane.list(&query).await.and_then(|s| s.decode()) {
            Ok(pods) => pods,
            Err(e) => return Verdict::query_failed(&format!("{} pods", self.namespace), &e),
        };

        if pods.is_empty() {
            return Verdict::fail(format!("No pods found in namespace {}", self.namespace));
        }

        let total = pods.len();
        let healthy = pods
            .iter()
            .filter(|pod| {
                matches!(
                    pod.status.as_ref().and_then(|s| s.phase.as_deref()),
                    Some("Running") | Some("Succeeded")
                )
            })
            .count();

        let message = format!("{}/{} {} pods are running", healthy, total, self.namespace);
        if healthy as f64 >= total as f64 * self.min_ratio {
            Verdict::pass(message)
        } else {
            Verdict::fail(format!("Only {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::{MockControlPlane, QueryError};
    use crate::evaluators::fixtures::{self, listing, Harness};

    #[tokio::test]
    async fn test_empty_node_list_fails() {
        let harness = Harness::new(listing(ResourceKind::Node, vec![]));
        let verdict = NodeReadiness::default().evaluate(&harness.ctx()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.message, "No nodes found");
    }

    #[tokio::test]
    async fn test_nodes_all_ready() {
        let harness = Harness::new(listing(
            ResourceKind::Node,
            vec![fixtures::node("minikube", Some("True")), fixtures::node("worker-1", Some("True"))],
        ));
        let verdict = NodeReadiness::default().evaluate(&harness.ctx()).await;
        assert!(verdict.passed);
        assert_eq!(verdict.message, "All 2 nodes are ready");
    }

    #[tokio::test]
    async fn test_node_without_ready_condition_is_not_ready() {
        let harness = Harness::new(listing(
            ResourceKind::Node,
            vec![
                fixtures::node("a", Some("True")),
                fixtures::node("b", Some("Unknown")),
                fixtures::node("c", None),
            ],
        ));
        let verdict = NodeReadiness::default().evaluate(&harness.ctx()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.message, "1/3 nodes are ready");
        assert_eq!(verdict.details, vec!["Node b is not ready", "Node c is not ready"]);
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_fails_connectivity() {
        let mut plane = MockControlPlane::new();
        plane.expect_ping().returning(|| {
            Err(QueryError::Unavailable {
                status: None,
                detail: "kubectl command not found".to_string(),
            })
        });
        let harness = Harness::new(plane);

        let verdict = ControlPlaneConnectivity.evaluate(&harness.ctx()).await;
        assert!(!verdict.passed);
        assert!(verdict.message.contains("kubectl command not found"));
    }

    #[tokio::test]
    async fn test_quorum_counts_completed_pods() {
        let mut items = Vec::new();
        for i in 0..9 {
            items.push(fixtures::pod(&format!("p{}", i), "Running", &[("c", true)]));
        }
        items.push(fixtures::pod("job", "Succeeded", &[("c", false)]));
        let harness = Harness::new(listing(ResourceKind::Pod, items));

        let verdict = PodQuorum::new("kube-system", 0.9).evaluate(&harness.ctx()).await;
        assert!(verdict.passed);
        assert_eq!(verdict.message, "10/10 kube-system pods are running");
    }

    #[tokio::test]
    async fn test_quorum_below_ratio_fails() {
        let items = vec![
            fixtures::pod("a", "Running", &[("c", true)]),
            fixtures::pod("b", "Pending", &[("c", false)]),
            fixtures::pod("c", "CrashLoopBackOff", &[("c", false)]),
        ];
        let harness = Harness::new(listing(ResourceKind::Pod, items));

        let verdict = PodQuorum::new("kube-system", 0.9).evaluate(&harness.ctx()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.message, "Only 1/3 kube-system pods are running");
    }
}
