pub mod access;
pub mod config;
pub mod control_plane;
pub mod evaluators;
pub mod metrics;
pub mod orchestrator;
pub mod profiles;
pub mod report;
pub mod result;
pub mod template;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Profile error: {0}")]
    Profile(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
