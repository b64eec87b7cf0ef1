//! Error types for the e2e harness.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("server failed to start: {0}")]
    ServerStartup(String),

    #[error("{name} health check failed after {attempts} attempts")]
    HealthCheck { name: String, attempts: usize },

    #[error("scenario parse error: {0}")]
    SpecParse(String),

    #[error("step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("core error: {0}")]
    Core(#[from] caregate_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
