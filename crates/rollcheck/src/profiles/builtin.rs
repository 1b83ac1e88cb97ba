//! Profiles shipped with the binary, one per subsystem.

use super::Profile;
use crate::{Error, Result};

const APP: &str = r#"
name: app
description: Next.js application behind a LoadBalancer service
namespace: default
checks:
  - label: Deployment status
    check:
      kind: deployment
      selector: "app={{ target }}"
  - label: Service existence
    check:
      kind: service
      name: "{{ target }}-service"
  - label: Pods running
    check:
      kind: pods
      selector: "app={{ target }}"
  - label: Application accessibility
    check:
      kind: reachability
      service: "{{ target }}-service"
      confirm:
        description: This is a Next.js application
        markers: [nextjs, react, next]
"#;

const DOCS: &str = r#"
name: docs
description: Docusaurus documentation site
namespace: default
checks:
  - label: Deployment status
    check:
      kind: deployment
      selector: "app={{ target }}-docs"
  - label: Service existence
    check:
      kind: service
      name: "{{ target }}-docs-service"
  - label: Pods running
    check:
      kind: pods
      selector: "app={{ target }}-docs"
  - label: Site accessibility
    check:
      kind: reachability
      service: "{{ target }}-docs-service"
      confirm:
        description: This is a Docusaurus documentation site
        markers: [docusaurus, apache, documentation]
"#;

const DAPR: &str = r#"
name: dapr
description: FastAPI service with a Dapr sidecar
namespace: default
checks:
  - label: Service deployment
    check:
      kind: deployment
      selector: "app={{ target }}"
  - label: Service existence
    check:
      kind: service
      name: "{{ target }}-service"
  - label: Pods running
    check:
      kind: pods
      selector: "app={{ target }}"
  - label: Dapr sidecar
    check:
      kind: sidecar
      selector: "app={{ target }}"
      containers: [daprd]
      annotations:
        dapr.io/enabled: "true"
  - label: Service connectivity
    check:
      kind: reachability
      service: "{{ target }}-service"
      path: /health
      accepted: [200]
"#;

const KAFKA: &str = r#"
name: kafka
description: Kafka brokers and Zookeeper
namespace: "{{ target }}"
checks:
  - label: Kafka pods
    check:
      kind: pods
      selector: "app.kubernetes.io/name={{ target }}"
  - label: Zookeeper pods
    check:
      kind: pods
      selector: app.kubernetes.io/name=zookeeper
  - label: Kafka service
    check:
      kind: service
      selector: "app.kubernetes.io/name={{ target }}"
  - label: Broker responds
    settle_secs: 10
    check:
      kind: exec
      selector: "app.kubernetes.io/name={{ target }}"
      command: [kafka-topics.sh, --list, --bootstrap-server, "localhost:9092"]
"#;

const POSTGRES: &str = r#"
name: postgres
description: PostgreSQL database with the application schema
namespace: "{{ target }}"
checks:
  - label: PostgreSQL pod
    check:
      kind: pods
      selector: "app.kubernetes.io/name={{ target }}"
  - label: PostgreSQL service
    check:
      kind: service
      selector: "app.kubernetes.io/name={{ target }}"
  - label: Database connection
    settle_secs: 10
    check:
      kind: exec
      selector: "app.kubernetes.io/name={{ target }}"
      command: [psql, -U, postgres, -d, learnflow_db, -c, "SELECT version();"]
      expect: [PostgreSQL]
  - label: Tables existence
    check:
      kind: exec
      selector: "app.kubernetes.io/name={{ target }}"
      command: [psql, -U, postgres, -d, learnflow_db, -c, '\dt']
      expect: [users, modules, lessons, exercises, user_progress, submissions, ai_interactions]
      min_ratio: 0.7
"#;

const CLUSTER: &str = r#"
name: cluster
description: Control plane, nodes and kube-system health
namespace: default
checks:
  - label: Control plane connectivity
    check:
      kind: control_plane
  - label: Nodes status
    check:
      kind: nodes
  - label: Core components
    namespace: kube-system
    check:
      kind: pod_quorum
      min_ratio: 0.9
"#;

const FOUNDATION: &str = r#"
name: foundation
description: Cluster ready to receive application deployments
namespace: default
checks:
  - label: API server connectivity
    check:
      kind: control_plane
  - label: Ingress controller
    namespace: ingress-nginx
    check:
      kind: pods
      selector: app.kubernetes.io/name=ingress-nginx
      optional: true
  - label: Storage classes
    check:
      kind: storage_class
"#;

const PROFILES: [(&str, &str); 7] = [
    ("app", APP),
    ("docs", DOCS),
    ("dapr", DAPR),
    ("kafka", KAFKA),
    ("postgres", POSTGRES),
    ("cluster", CLUSTER),
    ("foundation", FOUNDATION),
];

/// Names of the built-in profiles, in listing order.
pub fn names() -> Vec<&'static str> {
    PROFILES.iter().map(|(name, _)| *name).collect()
}

pub fn builtin(name: &str) -> Result<Profile> {
    let (_, source) = PROFILES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .ok_or_else(|| {
            Error::Profile(format!(
                "unknown profile '{}', available: {}",
                name,
                names().join(", ")
            ))
        })?;
    Profile::from_yaml_str(source)
}
