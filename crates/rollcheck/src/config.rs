use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Which control-plane adapter the checks run against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Backend {
    #[serde(rename = "kubectl")]
    #[default]
    Kubectl,
    #[serde(rename = "api")]
    Api,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "kubectl" => Ok(Backend::Kubectl),
            "api" => Ok(Backend::Api),
            other => Err(Error::Config(format!(
                "unknown backend '{}', expected 'kubectl' or 'api'",
                other
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Kubectl => write!(f, "kubectl"),
            Backend::Api => write!(f, "api"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubectlConfig {
    pub binary: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinikubeConfig {
    pub binary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    pub kubectl: KubectlConfig,
    pub minikube: MinikubeConfig,
    /// Upper bound for every subprocess and API call
    pub command_timeout: Duration,
    /// Upper bound for reachability probes
    pub http_timeout: Duration,
    /// Replaces every settle delay a profile declares
    pub settle_override: Option<Duration>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("ROLLCHECK_BACKEND") {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => Backend::default(),
        };

        let config = Config {
            backend,
            kubectl: KubectlConfig {
                binary: lookup("ROLLCHECK_KUBECTL")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "kubectl".to_string()),
                context: lookup("ROLLCHECK_KUBE_CONTEXT").filter(|s| !s.trim().is_empty()),
            },
            minikube: MinikubeConfig {
                binary: lookup("ROLLCHECK_MINIKUBE")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "minikube".to_string()),
            },
            command_timeout: timeout_secs(
                "ROLLCHECK_COMMAND_TIMEOUT_SECS",
                lookup("ROLLCHECK_COMMAND_TIMEOUT_SECS"),
                DEFAULT_COMMAND_TIMEOUT_SECS,
            )?,
            http_timeout: timeout_secs(
                "ROLLCHECK_HTTP_TIMEOUT_SECS",
                lookup("ROLLCHECK_HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?,
            settle_override: match lookup("ROLLCHECK_SETTLE_SECS") {
                Some(raw) => Some(Duration::from_secs(parse_secs("ROLLCHECK_SETTLE_SECS", &raw)?)),
                None => None,
            },
        };

        if config.kubectl.context.is_some() && config.backend == Backend::Api {
            tracing::warn!("ROLLCHECK_KUBE_CONTEXT only applies to the kubectl backend");
        }

        Ok(config)
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        Error::Config(format!(
            "{} must be a whole number of seconds, got '{}'",
            key, raw
        ))
    })
}

fn timeout_secs(key: &str, raw: Option<String>, default: u64) -> Result<Duration> {
    let secs = match raw {
        Some(raw) => parse_secs(key, &raw)?,
        None => default,
    };
    if secs == 0 {
        return Err(Error::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_secs(secs))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Kubectl,
            kubectl: KubectlConfig {
                binary: "kubectl".to_string(),
                context: None,
            },
            minikube: MinikubeConfig {
                binary: "minikube".to_string(),
            },
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            settle_override: None,
        }
    }
}
