//! Storage check: the cluster can provision volumes.

use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;

use super::{Evaluator, ProbeContext, Verdict};
use crate::control_plane::{decode_object, ResourceKind, ResourceQuery};

const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

fn is_default(class: &StorageClass) -> bool {
    class
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(DEFAULT_CLASS_ANNOTATION))
        .map(|value| value == "true")
        .unwrap_or(false)
}

fn describe(class: &StorageClass) -> String {
    format!(
        "{} (provisioner: {}{})",
        class.metadata.name.as_deref().unwrap_or("<unknown>"),
        class.provisioner,
        if is_default(class) { ", default" } else { "" }
    )
}

/// At least one storage class exists, or a specific one when named
#[derive(Debug, Clone, Default)]
pub struct StorageClassPresence {
    pub name: Option<String>,
}

impl StorageClassPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

#[async_trait]
impl Evaluator for StorageClassPresence {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        if let Some(name) = &self.name {
            let query = ResourceQuery::new(ResourceKind::StorageClass).named(name.clone());
            return match ctx
                .plane
                .get(&query)
                .await
                .and_then(|value| decode_object::<StorageClass>(ResourceKind::StorageClass, value))
            {
                Ok(class) => Verdict::pass(format!("Storage class {} exists", describe(&class))),
                Err(e) => Verdict::query_failed(&format!("Storage class {}", name), &e),
            };
        }

        let query = ResourceQuery::new(ResourceKind::StorageClass);
        let classes: Vec<StorageClass> = match ctx.plane.list(&query).await.and_then(|s| s.decode()) {
            Ok(classes) => classes,
            Err(e) => return Verdict::query_failed("storage classes", &e),
        };

        if classes.is_empty() {
            return Verdict::fail("No storage class found; volumes cannot be provisioned");
        }

        let details: Vec<String> = classes.iter().map(describe).collect();
        match classes.iter().find(|class| is_default(class)) {
            Some(default) => Verdict::pass(format!(
                "Default storage class is {}",
                default.metadata.name.as_deref().unwrap_or("<unknown>")
            ))
            .with_details(details),
            None => Verdict::pass(format!(
                "{} storage class(es) available, none marked default",
                classes.len()
            ))
            .with_details(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::{MockControlPlane, QueryError};
    use crate::evaluators::fixtures::{self, listing, Harness};

    #[tokio::test]
    async fn test_default_class_is_named() {
        let harness = Harness::new(listing(
            ResourceKind::StorageClass,
            vec![
                fixtures::storage_class("fast", false),
                fixtures::storage_class("standard", true),
            ],
        ));

        let verdict = StorageClassPresence::new().evaluate(&harness.ctx()).await;
        assert!(verdict.passed);
        assert_eq!(verdict.message, "Default storage class is standard");
        assert_eq!(
            verdict.details,
            vec![
                "fast (provisioner: k8s.io/minikube-hostpath)",
                "standard (provisioner: k8s.io/minikube-hostpath, default)",
            ]
        );
    }

    #[tokio::test]
    async fn test_any_class_is_enough_without_a_default() {
        let harness = Harness::new(listing(
            ResourceKind::StorageClass,
            vec![fixtures::storage_class("local-path", false)],
        ));

        let verdict = StorageClassPresence::new().evaluate(&harness.ctx()).await;
        assert!(verdict.passed);
        assert_eq!(verdict.message, "1 storage class(es) available, none marked default");
    }

    #[tokio::test]
    async fn test_no_class_fails() {
        let harness = Harness::new(listing(ResourceKind::StorageClass, vec![]));
        let verdict = StorageClassPresence::new().evaluate(&harness.ctx()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.message, "No storage class found; volumes cannot be provisioned");
    }

    #[tokio::test]
    async fn test_named_class_lookup() {
        let mut plane = MockControlPlane::new();
        plane
            .expect_get()
            .withf(|q| {
                q.kind == ResourceKind::StorageClass
                    && q.name.as_deref() == Some("standard")
                    && q.namespace.is_none()
            })
            .returning(|_| Ok(fixtures::storage_class("standard", true)));
        let harness = Harness::new(plane);

        let verdict = StorageClassPresence::named("standard").evaluate(&harness.ctx()).await;
        assert!(verdict.passed);
        assert_eq!(
            verdict.message,
            "Storage class standard (provisioner: k8s.io/minikube-hostpath, default) exists"
        );
    }

    #[tokio::test]
    async fn test_unreachable_cluster_fails() {
        let mut plane = MockControlPlane::new();
        plane.expect_list().returning(|_| {
            Err(QueryError::Unavailable {
                status: Some(1),
                detail: "Unable to connect to the server".to_string(),
            })
        });
        let harness = Harness::new(plane);

        let verdict = StorageClassPresence::new().evaluate(&harness.ctx()).await;
        assert!(!verdict.passed);
        assert!(verdict.message.starts_with("Cannot query storage classes"));
    }
}
