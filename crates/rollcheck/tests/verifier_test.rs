//! End-to-end runs of built-in profiles against an in-memory cluster and a
//! local HTTP server standing in for the exposed application.

use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Router};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Pod, PodSpec, PodStatus, Service, ServiceSpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::time::Duration;

use rollcheck::access::{HttpProbe, UrlResolver};
use rollcheck::control_plane::{
    ControlPlane, ExecOutput, ExecRequest, QueryError, ResourceKind, ResourceQuery, ResourceSnapshot,
};
use rollcheck::evaluators::ProbeContext;
use rollcheck::orchestrator::{Orchestrator, RunState};
use rollcheck::profiles;
use rollcheck::report::{self, TextReporter};
use rollcheck::result::RunTarget;

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn pod(name: &str, phase: &str, ready: bool) -> Value {
    serde_json::to_value(Pod {
        metadata: meta(name),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "web".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "web".to_string(),
                ready,
                image: "registry.local/web:1".to_string(),
                image_id: String::new(),
                restart_count: 0,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    })
    .unwrap()
}

fn deployment(name: &str, replicas: i32) -> Value {
    serde_json::to_value(Deployment {
        metadata: meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            ready_replicas: Some(replicas),
            updated_replicas: Some(replicas),
            ..Default::default()
        }),
    })
    .unwrap()
}

fn load_balancer(name: &str) -> Value {
    serde_json::to_value(Service {
        metadata: meta(name),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap()
}

fn storage_class(name: &str) -> Value {
    serde_json::to_value(StorageClass {
        metadata: meta(name),
        provisioner: "k8s.io/minikube-hostpath".to_string(),
        ..Default::default()
    })
    .unwrap()
}

/// A cluster whose only populated namespace is `default`
struct FakeCluster {
    pods: Vec<Value>,
    deployments: Vec<Value>,
    services: Vec<Value>,
    storage_classes: Vec<Value>,
}

impl FakeCluster {
    fn healthy(app: &str) -> Self {
        Self {
            pods: vec![
                pod(&format!("{}-1", app), "Running", true),
                pod(&format!("{}-2", app), "Running", true),
            ],
            deployments: vec![deployment(&format!("{}-deployment", app), 2)],
            services: vec![load_balancer(&format!("{}-service", app))],
            storage_classes: vec![storage_class("standard")],
        }
    }

    fn items(&self, kind: ResourceKind, namespace: Option<&str>) -> Vec<Value> {
        if kind.is_namespaced() && namespace != Some("default") {
            return Vec::new();
        }
        match kind {
            ResourceKind::Pod => self.pods.clone(),
            ResourceKind::Deployment => self.deployments.clone(),
            ResourceKind::Service => self.services.clone(),
            ResourceKind::StorageClass => self.storage_classes.clone(),
            ResourceKind::Node => Vec::new(),
        }
    }
}

#[async_trait]
impl ControlPlane for FakeCluster {
    async fn ping(&self) -> Result<String, QueryError> {
        Ok("v1.28.3".to_string())
    }

    async fn list(&self, query: &ResourceQuery) -> Result<ResourceSnapshot, QueryError> {
        assert_eq!(query.kind.is_namespaced(), query.namespace.is_some());
        Ok(ResourceSnapshot::new(
            query.kind,
            self.items(query.kind, query.namespace.as_deref()),
        ))
    }

    async fn get(&self, query: &ResourceQuery) -> Result<Value, QueryError> {
        self.items(query.kind, query.namespace.as_deref())
            .into_iter()
            .find(|item| item["metadata"]["name"].as_str() == query.name.as_deref())
            .ok_or_else(|| QueryError::NotFound {
                status: 1,
                stderr: format!("{} \"{}\" not found", query.kind, query.name.clone().unwrap_or_default()),
            })
    }

    async fn exec(&self, _request: &ExecRequest) -> Result<ExecOutput, QueryError> {
        Err(QueryError::Failed {
            status: 1,
            stderr: "exec is not supported here".to_string(),
        })
    }
}

/// Hands out the address of the local test server for every service
struct FixedResolver(String);

#[async_trait]
impl UrlResolver for FixedResolver {
    async fn resolve(&self, _service: &str, _namespace: &str) -> Result<Vec<String>, QueryError> {
        Ok(vec![self.0.clone()])
    }
}

async fn serve_app() -> String {
    let app = Router::new()
        .route("/", get(|| async { "<html>web</html>" }))
        .route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn block_headers(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.ends_with("...") && !line.starts_with(' '))
        .map(|line| line.trim_end_matches("...").to_string())
        .collect()
}

#[tokio::test]
async fn test_healthy_app_passes_every_check() {
    let url = serve_app().await;
    let cluster = FakeCluster::healthy("web");
    let resolver = FixedResolver(url);
    let http = HttpProbe::new(Duration::from_secs(5)).unwrap();
    let ctx = ProbeContext {
        plane: &cluster,
        resolver: &resolver,
        http: &http,
    };

    let plan = profiles::builtin("app").unwrap().build("web", None).unwrap();
    let mut reporter = TextReporter::new(Vec::new());
    let mut orchestrator = Orchestrator::new(ctx);
    assert_eq!(orchestrator.state(), RunState::NotStarted);
    let run = orchestrator
        .run(RunTarget::new("web", &plan.namespace, "app"), &plan.checks, &mut reporter)
        .await;
    reporter.summary(&run);

    assert_eq!(orchestrator.state(), RunState::Completed);
    assert!(run.overall_passed, "{:?}", run.results);
    assert_eq!(report::exit_status(&run), 0);
    assert_eq!(run.results[0].message, "Deployment web-deployment is ready (2/2 replicas)");
    assert!(run.results[3].message.starts_with("Service web-service is accessible at http://127.0.0.1:"));

    let text = String::from_utf8(reporter.into_inner()).unwrap();
    assert!(text.contains("✓ web verification successful! All 4 checks passed."));
}

#[tokio::test]
async fn test_pending_pod_fails_run_without_skipping_checks() {
    let url = serve_app().await;
    let mut cluster = FakeCluster::healthy("web");
    cluster.pods.push(pod("web-3", "Pending", false));
    let resolver = FixedResolver(url);
    let http = HttpProbe::new(Duration::from_secs(5)).unwrap();
    let ctx = ProbeContext {
        plane: &cluster,
        resolver: &resolver,
        http: &http,
    };

    let plan = profiles::builtin("app").unwrap().build("web", None).unwrap();
    let mut reporter = TextReporter::new(Vec::new());
    let run = Orchestrator::new(ctx)
        .run(RunTarget::new("web", &plan.namespace, "app"), &plan.checks, &mut reporter)
        .await;
    reporter.summary(&run);

    assert!(!run.overall_passed);
    assert_eq!(report::exit_status(&run), 1);
    assert_eq!(run.results.len(), plan.checks.len());
    assert!(!run.results[2].passed);
    assert_eq!(run.results[2].message, "2/3 pods for app=web are running and ready");
    assert!(run.results[3].passed, "checks after a failure still run");

    let text = String::from_utf8(reporter.into_inner()).unwrap();
    let labels: Vec<String> = plan.checks.iter().map(|c| c.label.clone()).collect();
    assert_eq!(block_headers(&text), labels);
    assert!(text.contains("✗ web verification failed! 1/4 checks failed."));
}

#[tokio::test]
async fn test_dapr_health_endpoint_must_return_ok() {
    let url = serve_app().await;
    let cluster = FakeCluster::healthy("triage");
    let resolver = FixedResolver(url);
    let http = HttpProbe::new(Duration::from_secs(5)).unwrap();
    let ctx = ProbeContext {
        plane: &cluster,
        resolver: &resolver,
        http: &http,
    };

    let plan = profiles::builtin("dapr").unwrap().build("triage", None).unwrap();
    let run = Orchestrator::new(ctx)
        .run(
            RunTarget::new("triage", &plan.namespace, "dapr"),
            &plan.checks,
            &mut rollcheck::orchestrator::NoopObserver,
        )
        .await;

    assert!(!run.overall_passed);
    let sidecar = &run.results[3];
    assert_eq!(sidecar.name, "Dapr sidecar");
    assert!(!sidecar.passed);
    let connectivity = &run.results[4];
    assert!(!connectivity.passed);
    assert!(connectivity.message.contains("returned status 503"));
}

#[tokio::test]
async fn test_foundation_passes_without_ingress_installed() {
    let cluster = FakeCluster::healthy("web");
    let resolver = FixedResolver("http://127.0.0.1:9".to_string());
    let http = HttpProbe::new(Duration::from_secs(5)).unwrap();
    let ctx = ProbeContext {
        plane: &cluster,
        resolver: &resolver,
        http: &http,
    };

    let plan = profiles::builtin("foundation").unwrap().build("minikube", None).unwrap();
    let mut reporter = TextReporter::new(Vec::new());
    let run = Orchestrator::new(ctx)
        .run(RunTarget::new("minikube", &plan.namespace, "foundation"), &plan.checks, &mut reporter)
        .await;
    reporter.summary(&run);

    assert!(run.overall_passed, "{:?}", run.results);
    assert_eq!(run.results[1].name, "Ingress controller");
    assert!(run.results[1].message.contains("not installed"));
    assert_eq!(run.results[2].message, "1 storage class(es) available, none marked default");
}

#[tokio::test]
async fn test_foundation_fails_without_storage_class() {
    let mut cluster = FakeCluster::healthy("web");
    cluster.storage_classes.clear();
    let resolver = FixedResolver("http://127.0.0.1:9".to_string());
    let http = HttpProbe::new(Duration::from_secs(5)).unwrap();
    let ctx = ProbeContext {
        plane: &cluster,
        resolver: &resolver,
        http: &http,
    };

    let plan = profiles::builtin("foundation").unwrap().build("minikube", None).unwrap();
    let run = Orchestrator::new(ctx)
        .run(
            RunTarget::new("minikube", &plan.namespace, "foundation"),
            &plan.checks,
            &mut rollcheck::orchestrator::NoopObserver,
        )
        .await;

    assert!(!run.overall_passed);
    assert_eq!(report::exit_status(&run), 1);
    assert!(run.results[0].passed);
    assert!(run.results[1].passed);
    assert!(!run.results[2].passed);
}
