//! Registry error types

use thiserror::Error;

/// Errors reading the gear registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed registry file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
