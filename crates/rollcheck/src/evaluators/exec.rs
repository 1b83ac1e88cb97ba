//! In-pod command probe.

use async_trait::async_trait;
use tracing::debug;

use super::workload::selected_pods;
use super::{scope, Evaluator, ProbeContext, Verdict};
use crate::control_plane::ExecRequest;

/// Runs a read-only command in the first running pod of a selector and looks
/// for expected markers in its output.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    pub namespace: String,
    pub selector: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    /// Substrings looked for in stdout
    pub expect: Vec<String>,
    /// Share of `expect` that must be present
    pub min_ratio: f64,
}

impl ExecProbe {
    pub fn new(namespace: impl Into<String>, selector: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            selector: selector.into(),
            container: None,
            command,
            expect: Vec::new(),
            min_ratio: 1.0,
        }
    }

    pub fn expecting(mut self, expect: Vec<String>, min_ratio: f64) -> Self {
        self.expect = expect;
        self.min_ratio = min_ratio;
        self
    }

    fn program(&self) -> String {
        self.command.first().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Evaluator for ExecProbe {
    async fn evaluate(&self, ctx: &ProbeContext<'_>) -> Verdict {
        let pods = match selected_pods(ctx.plane, &self.namespace, &self.selector).await {
            Ok(pods) => pods,
            Err(e) => return Verdict::query_failed("pods", &e),
        };

        let running = pods.iter().find(|pod| {
            pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
        });
        let Some(pod_name) = running.and_then(|pod| pod.metadata.name.clone()) else {
            return Verdict::fail(format!(
                "No running pod found matching {}",
                scope(&self.selector, &self.namespace)
            ));
        };

        let request = ExecRequest {
            namespace: self.namespace.clone(),
            pod: pod_name.clone(),
            container: self.container.clone(),
            command: self.command.clone(),
        };
        debug!("Running {:?} in {}/{}", self.command, self.namespace, pod_name);

        let output = match ctx.plane.exec(&request).await {
            Ok(output) => output,
            Err(e) => {
                return Verdict::fail(format!("Could not run {} in pod {}: {}", self.program(), pod_name, e))
            }
        };

        if !output.success() {
            let mut verdict = Verdict::fail(format!(
                "{} in pod {} exited with status {}",
                self.program(),
                pod_name,
                output.status
            ));
            let stderr = output.stderr.trim();
            if !stderr.is_empty() {
                verdict = verdict.with_details(stderr.lines().map(str::to_string).collect());
            }
            return verdict;
        }

        if self.expect.is_empty() {
            return Verdict::pass(format!("{} succeeded in pod {}", self.program(), pod_name));
        }

        let mut found = 0;
        let mut missing = Vec::new();
        for marker in &self.expect {
            if output.stdout.contains(marker.as_str()) {
                found += 1;
            } else {
                missing.push(format!("Missing: {}", marker));
            }
        }
        let total = self.expect.len();
        let message = format!(
            "{}/{} markers found in output of {} (pod {})",
            found,
            total,
            self.program(),
            pod_name
        );

        if found as f64 >= total as f64 * self.min_ratio {
            Verdict::pass(message).with_details(missing)
        } else {
            Verdict::fail(message).with_details(missing)
        }
    }
}
