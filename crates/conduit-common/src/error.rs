//! Error types shared across Conduit crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Main error type for shared Conduit code
#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid tenant id: {0}")]
    InvalidTenant(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
