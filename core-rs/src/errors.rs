//! Error types for DCP Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DcpError {
    #[error("Environment file error: {0}")]
    EnvFile(String),

    #[error("Unresolved variable: {0}")]
    UnresolvedVariable(String),

    #[error("Malformed port: {0}")]
    MalformedPort(String),

    #[error("No available port: {0}")]
    NoAvailablePort(String),

    #[error("Write failure: {0}")]
    WriteFailure(String),

    #[error("Compose file error: {0}")]
    ComposeFile(String),

    #[error("Invalid port range: {0}")]
    InvalidPortRange(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DcpError>;
