//! Service checks: existence and external reachability.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, warn};

use super::{scope, Evaluator, Lookup, ProbeContext, Verdict};
use crate::control_plane::{decode_object, ResourceKind, ResourceQuery};

/// Status codes accepted when none are configured
pub const DEFAULT_ACCEPTED_STATUSES: [u16; 5] = [200, 201, 301, 302, 304];

fn service_type(service: &Service) -> &str {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .unwrap_or("ClusterIP")
}

#[derive(Debug, Clone)]
pub struct ServiceExists {
    pub namespace: String,
    pub lookup: Lookup,
}

impl ServiceExists {
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lookup: Lookup::Named(name.into()),
        }
    }

    pub fn selected(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lookup: Lookup::Selector(selector.into()),
        }
    }
}

#[async_trait]
impl Evaluator for ServiceExists {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        match &self.lookup {
            Lookup::Named(name) => {
                let query = ResourceQuery::new(ResourceKind::Service)
                    .named(name.clone())
                    .in_namespace(self.namespace.clone());
                let service: Service = match ctx
                    .plane
                    .get(&query)
                    .await
                    .and_then(|value| decode_object(ResourceKind::Service, value))
                {
                    Ok(service) => service,
                    Err(e) => return Verdict::query_failed(&format!("Service {}", name), &e),
                };
                Verdict::pass(format!("Service {} exists (type: {})", name, service_type(&service)))
            }
            Lookup::Selector(selector) => {
                let query = ResourceQuery::new(ResourceKind::Service)
                    .in_namespace(self.namespace.clone())
                    .with_selector(selector.clone());
                let services: Vec<Service> = match ctx.plane.list(&query).await.and_then(|s| s.decode()) {
                    Ok(services) => services,
                    Err(e) => return Verdict::query_failed("services", &e),
                };
                if services.is_empty() {
                    return Verdict::fail(format!(
                        "No service found matching {}",
                        scope(selector, &self.namespace)
                    ));
                }
                let names: Vec<String> = services
                    .iter()
                    .map(|s| {
                        format!(
                            "{} (type: {})",
                            s.metadata.name.as_deref().unwrap_or("<unknown>"),
                            service_type(s)
                        )
                    })
                    .collect();
                Verdict::pass(format!("Found {} service(s) for {}", services.len(), selector)).with_details(names)
            }
        }
    }
}

/// Body markers that identify what answers behind a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMarkers {
    /// Printed after "Confirmed: " when a marker is found
    pub description: String,
    pub markers: Vec<String>,
}

/// LoadBalancer services answer HTTP from outside the cluster
#[derive(Debug, Clone)]
pub struct ExternalReachability {
    pub namespace: String,
    pub service: String,
    /// Appended to the resolved URL
    pub path: String,
    pub accepted: Vec<u16>,
    /// Informational only; never fails the check
    pub content: Option<ContentMarkers>,
}

impl ExternalReachability {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            path: String::new(),
            accepted: DEFAULT_ACCEPTED_STATUSES.to_vec(),
            content: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_accepted(mut self, accepted: Vec<u16>) -> Self {
        self.accepted = accepted;
        self
    }

    pub fn with_content(mut self, description: impl Into<String>, markers: Vec<String>) -> Self {
        self.content = Some(ContentMarkers {
            description: description.into(),
            markers,
        });
        self
    }

    fn join(&self, base: &str) -> String {
        if self.path.is_empty() {
            return base.to_string();
        }
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Evaluator for ExternalReachability {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let query = ResourceQuery::new(ResourceKind::Service)
            .named(self.service.clone())
            .in_namespace(self.namespace.clone());
        let service: Service = match ctx
            .plane
            .get(&query)
            .await
            .and_then(|value| decode_object(ResourceKind::Service, value))
        {
            Ok(service) => service,
            Err(e) => return Verdict::query_failed(&format!("Service {}", self.service), &e),
        };

        let type_ = service_type(&service);
        if type_ != "LoadBalancer" {
            return Verdict::pass(format!("Service {} exists (type: {})", self.service, type_));
        }

        let urls = match ctx.resolver.resolve(&self.service, &self.namespace).await {
            Ok(urls) => urls,
            Err(e) => {
                return Verdict::fail(format!("Could not get service URL for {}: {}", self.service, e))
            }
        };
        let Some(base) = urls.first() else {
            return Verdict::fail(format!("Could not get external URL for {}", self.service));
        };

        let url = self.join(base);
        debug!("Probing {}", url);
        match ctx.http.fetch(&url).await {
            Ok(reply) if self.accepted.contains(&reply.status) => {
                let verdict = Verdict::pass(format!("Service {} is accessible at {}", self.service, url));
                match &self.content {
                    Some(content) => match reply.find_marker(&content.markers) {
                        Some(marker) => {
                            debug!("Found {:?} in body of {}", marker, url);
                            verdict.with_details(vec![format!("Confirmed: {}", content.description)])
                        }
                        None => verdict,
                    },
                    None => verdict,
                }
            }
            Ok(reply) => Verdict::fail(format!(
                "Service {} returned status {} at {}",
                self.service, reply.status, url
            )),
            Err(e) => {
                warn!("GET {} failed: {}", url, e);
                Verdict::fail(format!("Cannot access service {} at {}: {}", self.service, url, e))
            }
        }
    }
}
