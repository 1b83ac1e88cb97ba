//! Kubernetes API backend
//!
//! Same contract as the kubectl backend, served by `kube::Client`. Typed
//! objects are serialized back to JSON so evaluators stay backend-agnostic.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, AttachParams, ListParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::{ControlPlane, ExecOutput, ExecRequest, QueryError, ResourceKind, ResourceQuery, ResourceSnapshot};

/// Control-plane adapter backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
    timeout: Duration,
}

impl KubeApiClient {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Build a client from the local kubeconfig or in-cluster environment.
    pub async fn try_default(timeout: Duration) -> crate::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, timeout))
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        bounded(self.timeout, fut).await
    }

    async fn list_with<K>(&self, api: Api<K>, query: &ResourceQuery) -> Result<Vec<Value>, QueryError>
    where
        K: Clone + DeserializeOwned + Serialize + Debug,
    {
        let mut params = ListParams::default();
        if let Some(selector) = &query.selector {
            params = params.labels(selector);
        }
        let list = self.bounded(api.list(&params)).await?;
        list.items.iter().map(to_json).collect()
    }

    async fn get_with<K>(&self, api: Api<K>, name: &str) -> Result<Value, QueryError>
    where
        K: Clone + DeserializeOwned + Serialize + Debug,
    {
        let object = self.bounded(api.get(name)).await?;
        to_json(&object)
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(QueryError::from),
        Err(_) => Err(QueryError::Unavailable {
            status: None,
            detail: format!("API server did not answer within {:?}", timeout),
        }),
    }
}

fn to_json<K: Serialize>(object: &K) -> Result<Value, QueryError> {
    serde_json::to_value(object).map_err(|e| QueryError::Malformed(e.to_string()))
}

impl From<kube::Error> for QueryError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => QueryError::NotFound {
                status: 404,
                stderr: response.message,
            },
            kube::Error::Api(response) => QueryError::Failed {
                status: i32::from(response.code),
                stderr: response.message,
            },
            kube::Error::SerdeError(e) => QueryError::Malformed(e.to_string()),
            other => QueryError::Unavailable {
                status: None,
                detail: other.to_string(),
            },
        }
    }
}

/// Exit code carried by the status frame of an exec session
fn exit_code(status: Option<Status>) -> i32 {
    let Some(status) = status else {
        return 1;
    };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }
    status
        .details
        .and_then(|details| details.causes)
        .and_then(|causes| {
            causes
                .into_iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message)
        .and_then(|message| message.trim().parse().ok())
        .unwrap_or(1)
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_string(&mut buf).await {
            debug!("Exec stream ended early: {}", e);
        }
    }
    buf
}

#[async_trait]
impl ControlPlane for KubeApiClient {
    async fn ping(&self) -> Result<String, QueryError> {
        let info = self.bounded(self.client.apiserver_version()).await?;
        Ok(info.git_version)
    }

    async fn list(&self, query: &ResourceQuery) -> Result<ResourceSnapshot, QueryError> {
        let namespace = query.namespace.as_deref();
        let items = match query.kind {
            ResourceKind::Node => self.list_with(Api::<Node>::all(self.client.clone()), query).await?,
            ResourceKind::Pod => self.list_with(self.namespaced::<Pod>(namespace), query).await?,
            ResourceKind::Deployment => {
                self.list_with(self.namespaced::<Deployment>(namespace), query).await?
            }
            ResourceKind::Service => {
                self.list_with(self.namespaced::<Service>(namespace), query).await?
            }
            ResourceKind::StorageClass => {
                self.list_with(Api::<StorageClass>::all(self.client.clone()), query).await?
            }
        };
        debug!("API returned {} {}", items.len(), query.kind.plural());
        Ok(ResourceSnapshot::new(query.kind, items))
    }

    async fn get(&self, query: &ResourceQuery) -> Result<Value, QueryError> {
        let name = query.name.as_deref().ok_or_else(|| {
            QueryError::Malformed(format!("a {} lookup needs a name", query.kind))
        })?;
        let namespace = query.namespace.as_deref();
        match query.kind {
            ResourceKind::Node => self.get_with(Api::<Node>::all(self.client.clone()), name).await,
            ResourceKind::Pod => self.get_with(self.namespaced::<Pod>(namespace), name).await,
            ResourceKind::Deployment => {
                self.get_with(self.namespaced::<Deployment>(namespace), name).await
            }
            ResourceKind::Service => self.get_with(self.namespaced::<Service>(namespace), name).await,
            ResourceKind::StorageClass => {
                self.get_with(Api::<StorageClass>::all(self.client.clone()), name).await
            }
        }
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput, QueryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let mut params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        if let Some(container) = &request.container {
            params = params.container(container.clone());
        }

        let mut attached = self
            .bounded(pods.exec(&request.pod, request.command.clone(), &params))
            .await?;

        let status = attached.take_status();
        let stdout = attached.stdout();
        let stderr = attached.stderr();

        let session = async {
            let (stdout, stderr) = tokio::join!(read_all(stdout), read_all(stderr));
            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            (stdout, stderr, status)
        };

        let (stdout, stderr, status) = tokio::time::timeout(self.timeout, session)
            .await
            .map_err(|_| QueryError::Unavailable {
                status: None,
                detail: format!(
                    "exec in pod {} did not finish within {:?}",
                    request.pod, self.timeout
                ),
            })?;

        Ok(ExecOutput {
            status: exit_code(status),
            stdout,
            stderr,
        })
    }
}
