//! Kubectl backend
//!
//! Shells out to `kubectl` and parses its JSON output. Every invocation is
//! bounded by a timeout; on expiry the child process is killed.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{ControlPlane, ExecOutput, ExecRequest, QueryError, ResourceQuery, ResourceSnapshot};
use crate::config::Config;

/// Printed by `kubectl exec` when the remote command exits non-zero
const COMMAND_TERMINATED: &str = "command terminated with exit code";

/// Control-plane adapter backed by the `kubectl` binary
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    context: Option<String>,
    timeout: Duration,
}

/// Raw result of one kubectl invocation
#[derive(Debug)]
struct CommandOutput {
    status: i32,
    stdout: String,
    stderr: String,
}

impl KubectlClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            context: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.kubectl.binary.clone())
            .with_context(config.kubectl.context.clone())
            .with_timeout(config.command_timeout)
    }

    /// Pin every call to a kubeconfig context
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }

    fn get_args(&self, query: &ResourceQuery) -> Vec<String> {
        let mut args = self.global_args();
        args.push(format!("--request-timeout={}s", self.timeout.as_secs().max(1)));
        args.push("get".to_string());
        args.push(query.kind.plural().to_string());
        if let Some(name) = &query.name {
            args.push(name.clone());
        }
        if query.kind.is_namespaced() {
            if let Some(namespace) = &query.namespace {
                args.push("-n".to_string());
                args.push(namespace.clone());
            }
        }
        if let Some(selector) = &query.selector {
            args.push("-l".to_string());
            args.push(selector.clone());
        }
        args.push("-o".to_string());
        args.push("json".to_string());
        args
    }

    fn exec_args(&self, request: &ExecRequest) -> Vec<String> {
        let mut args = self.global_args();
        args.push("exec".to_string());
        args.push("-n".to_string());
        args.push(request.namespace.clone());
        args.push(request.pod.clone());
        if let Some(container) = &request.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        args.push("--".to_string());
        args.extend(request.command.iter().cloned());
        args
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput, QueryError> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

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

        Ok(CommandOutput {
            // Killed by a signal
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_json(&self, args: &[String]) -> Result<Value, QueryError> {
        let output = self.run(args).await?;
        if output.status != 0 {
            return Err(QueryError::from_exit(output.status, &output.stderr));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| QueryError::Malformed(format!("kubectl printed invalid JSON: {}", e)))
    }
}

fn items_of(value: Value) -> Result<Vec<Value>, QueryError> {
    match value {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) => Ok(Vec::new()),
            _ => Err(QueryError::Malformed(
                "expected a list object with an `items` array".to_string(),
            )),
        },
        _ => Err(QueryError::Malformed("expected a JSON object".to_string())),
    }
}

fn server_version(value: &Value) -> Result<String, QueryError> {
    value
        .pointer("/serverVersion/gitVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| QueryError::Unavailable {
            status: None,
            detail: "kubectl did not report a server version".to_string(),
        })
}

#[async_trait]
impl ControlPlane for KubectlClient {
    async fn ping(&self) -> Result<String, QueryError> {
        let mut args = self.global_args();
        args.push(format!("--request-timeout={}s", self.timeout.as_secs().max(1)));
        args.extend(["version", "-o", "json"].map(String::from));

        let value = self.run_json(&args).await?;
        server_version(&value)
    }

    async fn list(&self, query: &ResourceQuery) -> Result<ResourceSnapshot, QueryError> {
        let value = self.run_json(&self.get_args(query)).await?;
        let items = items_of(value)?;
        debug!("kubectl returned {} {}", items.len(), query.kind.plural());
        Ok(ResourceSnapshot::new(query.kind, items))
    }

    async fn get(&self, query: &ResourceQuery) -> Result<Value, QueryError> {
        if query.name.is_none() {
            return Err(QueryError::Malformed(format!(
                "a {} lookup needs a name",
                query.kind
            )));
        }
        let value = self.run_json(&self.get_args(query)).await?;
        if value.pointer("/metadata/name").is_none() {
            return Err(QueryError::Malformed(format!(
                "{} object has no metadata.name",
                query.kind
            )));
        }
        Ok(value)
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput, QueryError> {
        let output = self.run(&self.exec_args(request)).await?;
        // The command ran; whatever it printed is its own business
        if output.status != 0 && !output.stderr.contains(COMMAND_TERMINATED) {
            let err = QueryError::from_exit(output.status, &output.stderr);
            // kubectl failed before the command ever reached the container
            if err.is_unavailable()
                || (err.is_not_found() && output.stderr.contains("Error from server"))
            {
                return Err(err);
            }
        }
        Ok(ExecOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
