use thiserror::Error;

/// Failure while building or rendering an OpenAPI document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown HTTP method {0}")]
    UnknownMethod(String),
}
