//! Error types for the build server

use thiserror::Error;

/// Main error type for the build server
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("queue is closed")]
    QueueClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("adapter error: {0}")]
    AdapterError(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
