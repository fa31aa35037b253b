//! CLI error surface

use gantry_orchestrator::OrchestratorError;
use gantry_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the `gear` command
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error("failed to load gear descriptor: {0}")]
    Descriptor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for CLI operations
pub type CliResult<T> = std::result::Result<T, CliError>;
