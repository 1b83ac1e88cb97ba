//! External access helpers
//!
//! URL resolution for LoadBalancer services and the bounded HTTP probe used
//! by the reachability check.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::control_plane::QueryError;
use crate::Result;

/// Finds the externally reachable address of a service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// Candidate URLs in preference order; may be empty.
    async fn resolve(&self, service: &str, namespace: &str) -> std::result::Result<Vec<String>, QueryError>;
}

/// Resolves URLs through `minikube service <name> --url`
#[derive(Debug, Clone)]
pub struct MinikubeResolver {
    binary: String,
    timeout: Duration,
}

impl MinikubeResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.minikube.binary.clone()).with_timeout(config.command_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Keep the lines of minikube output that are usable HTTP URLs.
fn parse_urls(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            Url::parse(line)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl UrlResolver for MinikubeResolver {
    async fn resolve(&self, service: &str, namespace: &str) -> std::result::Result<Vec<String>, QueryError> {
        debug!("Resolving URL of service {}/{} via {}", namespace, service, self.binary);

        let mut cmd = Command::new(&self.binary);
        cmd.args(["service", service, "--url", "-n", namespace])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(QueryError::Unavailable {
                    status: None,
                    detail: format!("{} command not found", self.binary),
                })
            }
            Ok(Err(e)) => {
                return Err(QueryError::Unavailable {
                    status: None,
                    detail: format!("failed to run {}: {}", self.binary, e),
                })
            }
            Err(_) => {
                return Err(QueryError::Unavailable {
                    status: None,
                    detail: format!("{} did not finish within {:?}", self.binary, self.timeout),
                })
            }
        };

        let status = output.status.code().unwrap_or(-1);
        if status != 0 {
            return Err(QueryError::Failed {
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_urls(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// What a GET came back with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    /// First marker that occurs in the body, ignoring case.
    pub fn find_marker<'a>(&self, markers: &'a [String]) -> Option<&'a str> {
        let body = self.body.to_lowercase();
        markers
            .iter()
            .find(|marker| body.contains(&marker.to_lowercase()))
            .map(String::as_str)
    }
}

/// Plain GET with a bounded timeout. Redirects are reported, never followed.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Status code and body returned for `url`.
    pub async fn fetch(&self, url: &str) -> std::result::Result<HttpReply, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}
