//! Verification Profiles
//!
//! A profile is the ordered check list for one kind of subsystem, expressed
//! as data. String fields are templates rendered against the run's target
//! and namespace before the evaluators are built.

pub mod builtin;

pub use builtin::{builtin, names};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::evaluators::{
    ControlPlaneConnectivity, DeploymentRollout, Evaluator, ExecProbe, ExternalReachability, NodeReadiness,
    PodQuorum, PodReadiness, ServiceExists, SidecarMarker, SidecarPresence, StorageClassPresence,
};
use crate::orchestrator::Check;
use crate::template;
use crate::{Error, Result};

fn default_namespace() -> String {
    "default".to_string()
}

fn default_quorum() -> f64 {
    0.9
}

fn default_exec_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Namespace template used when none is given on the command line
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub checks: Vec<CheckEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub label: String,
    /// Overrides the run namespace for this check only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_secs: Option<u64>,
    pub check: CheckSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckSpec {
    ControlPlane,
    Nodes {
        #[serde(default)]
        selector: Option<String>,
    },
    Pods {
        selector: String,
        /// No matching pod counts as a pass
        #[serde(default)]
        optional: bool,
    },
    PodQuorum {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default = "default_quorum")]
        min_ratio: f64,
    },
    Deployment {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        selector: Option<String>,
    },
    Service {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        selector: Option<String>,
    },
    Sidecar {
        selector: String,
        #[serde(default)]
        containers: Vec<String>,
        #[serde(default)]
        annotations: BTreeMap<String, String>,
    },
    Reachability {
        service: String,
        #[serde(default)]
        path: String,
        #[serde(default)]
        accepted: Option<Vec<u16>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confirm: Option<ContentSpec>,
    },
    StorageClass {
        #[serde(default)]
        name: Option<String>,
    },
    Exec {
        selector: String,
        #[serde(default)]
        container: Option<String>,
        command: Vec<String>,
        #[serde(default)]
        expect: Vec<String>,
        #[serde(default = "default_exec_ratio")]
        min_ratio: f64,
    },
}

/// Body markers that confirm what kind of site answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSpec {
    pub description: String,
    pub markers: Vec<String>,
}

/// A profile bound to a target: resolved namespace plus ready-to-run checks
#[derive(Debug)]
pub struct ResolvedPlan {
    pub namespace: String,
    pub checks: Vec<Check>,
}

fn check_one_lookup(label: &str, kind: &str, name: &Option<String>, selector: &Option<String>) -> Result<()> {
    if name.is_some() == selector.is_some() {
        return Err(Error::Profile(format!(
            "check '{}': {} needs exactly one of name or selector",
            label, kind
        )));
    }
    Ok(())
}

fn check_ratio(label: &str, ratio: f64) -> Result<()> {
    if ratio > 0.0 && ratio <= 1.0 {
        Ok(())
    } else {
        Err(Error::Profile(format!(
            "check '{}': min_ratio must be in (0, 1], got {}",
            label, ratio
        )))
    }
}

impl Profile {
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let profile: Profile = serde_yaml::from_str(source)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Profile(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&source)
    }

    /// Reject profiles that could never produce a meaningful verdict.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Profile("profile name must not be empty".to_string()));
        }
        if self.checks.is_empty() {
            return Err(Error::Profile(format!("profile '{}' declares no checks", self.name)));
        }

        for entry in &self.checks {
            let label = entry.label.as_str();
            if label.trim().is_empty() {
                return Err(Error::Profile(format!(
                    "profile '{}' has a check without a label",
                    self.name
                )));
            }
            match &entry.check {
                CheckSpec::Service { name, selector } => check_one_lookup(label, "service", name, selector)?,
                CheckSpec::Deployment { name, selector } => {
                    check_one_lookup(label, "deployment", name, selector)?
                }
                CheckSpec::Sidecar {
                    containers, annotations, ..
                } => {
                    if containers.is_empty() && annotations.is_empty() {
                        return Err(Error::Profile(format!(
                            "check '{}': sidecar needs at least one container name or annotation",
                            label
                        )));
                    }
                }
                CheckSpec::PodQuorum { min_ratio, .. } => check_ratio(label, *min_ratio)?,
                CheckSpec::Exec {
                    command, min_ratio, ..
                } => {
                    if command.is_empty() {
                        return Err(Error::Profile(format!("check '{}': exec command is empty", label)));
                    }
                    check_ratio(label, *min_ratio)?;
                }
                CheckSpec::Reachability { accepted, confirm, .. } => {
                    if accepted.as_ref().is_some_and(Vec::is_empty) {
                        return Err(Error::Profile(format!(
                            "check '{}': accepted status list is empty",
                            label
                        )));
                    }
                    if confirm.as_ref().is_some_and(|c| c.markers.is_empty()) {
                        return Err(Error::Profile(format!(
                            "check '{}': confirm needs at least one marker",
                            label
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Bind the profile to `target`. `namespace` wins over the profile default.
    pub fn build(&self, target: &str, namespace: Option<&str>) -> Result<ResolvedPlan> {
        let namespace = match namespace {
            Some(namespace) => namespace.to_string(),
            None => template::render(&self.namespace, &json!({ "target": target }))?,
        };
        let context = json!({ "target": target, "namespace": namespace });

        let mut checks = Vec::with_capacity(self.checks.len());
        for entry in &self.checks {
            let check_namespace = match &entry.namespace {
                Some(ns) => template::render(ns, &context)?,
                None => namespace.clone(),
            };
            let evaluator = entry.check.evaluator(&context, check_namespace)?;
            checks.push(Check {
                label: template::render(&entry.label, &context)?,
                settle: Duration::from_secs(entry.settle_secs.unwrap_or(0)),
                evaluator,
            });
        }

        debug!(
            "Profile {} bound to {} in namespace {}: {} checks",
            self.name,
            target,
            namespace,
            checks.len()
        );
        Ok(ResolvedPlan { namespace, checks })
    }
}

impl CheckSpec {
    fn evaluator(&self, context: &Value, namespace: String) -> Result<Box<dyn Evaluator>> {
        let render = |s: &str| template::render(s, context);

        let evaluator: Box<dyn Evaluator> = match self {
            CheckSpec::ControlPlane => Box::new(ControlPlaneConnectivity),
            CheckSpec::Nodes { selector } => Box::new(NodeReadiness {
                selector: selector.as_deref().map(render).transpose()?,
            }),
            CheckSpec::Pods { selector, optional } => {
                Box::new(PodReadiness::new(namespace, render(selector)?).optional(*optional))
            }
            CheckSpec::PodQuorum { selector, min_ratio } => Box::new(PodQuorum {
                namespace,
                selector: selector.as_deref().map(render).transpose()?,
                min_ratio: *min_ratio,
            }),
            CheckSpec::Deployment { name, selector } => match (name, selector) {
                (Some(name), None) => Box::new(DeploymentRollout::named(namespace, render(name)?)),
                (None, Some(selector)) => Box::new(DeploymentRollout::new(namespace, render(selector)?)),
                _ => {
                    return Err(Error::Profile(
                        "deployment check needs exactly one of name or selector".to_string(),
                    ))
                }
            },
            CheckSpec::Service { name, selector } => match (name, selector) {
                (Some(name), None) => Box::new(ServiceExists::named(namespace, render(name)?)),
                (None, Some(selector)) => Box::new(ServiceExists::selected(namespace, render(selector)?)),
                _ => {
                    return Err(Error::Profile(
                        "service check needs exactly one of name or selector".to_string(),
                    ))
                }
            },
            CheckSpec::Sidecar {
                selector,
                containers,
                annotations,
            } => {
                let mut markers = Vec::with_capacity(containers.len() + annotations.len());
                for container in containers {
                    markers.push(SidecarMarker::Container(render(container)?));
                }
                for (key, value) in annotations {
                    markers.push(SidecarMarker::Annotation {
                        key: key.clone(),
                        value: render(value)?,
                    });
                }
                Box::new(SidecarPresence {
                    namespace,
                    selector: render(selector)?,
                    markers,
                })
            }
            CheckSpec::Reachability {
                service,
                path,
                accepted,
                confirm,
            } => {
                let mut check = ExternalReachability::new(namespace, render(service)?).with_path(render(path)?);
                if let Some(accepted) = accepted {
                    check = check.with_accepted(accepted.clone());
                }
                if let Some(confirm) = confirm {
                    check = check.with_content(render(&confirm.description)?, confirm.markers.clone());
                }
                Box::new(check)
            }
            CheckSpec::StorageClass { name } => match name {
                Some(name) => Box::new(StorageClassPresence::named(render(name)?)),
                None => Box::new(StorageClassPresence::new()),
            },
            CheckSpec::Exec {
                selector,
                container,
                command,
                expect,
                min_ratio,
            } => {
                let mut probe = ExecProbe::new(
                    namespace,
                    render(selector)?,
                    command.iter().map(|arg| render(arg)).collect::<Result<Vec<_>>>()?,
                )
                .expecting(
                    expect.iter().map(|marker| render(marker)).collect::<Result<Vec<_>>>()?,
                    *min_ratio,
                );
                probe.container = container.as_deref().map(render).transpose()?;
                Box::new(probe)
            }
        };
        Ok(evaluator)
    }
}
