//! Orchestrator error types

use gantry_registry::RegistryError;
use gantry_store::StoreError;
use gantry_types::{AggregateResult, DeploymentId};
use std::time::Duration;
use thiserror::Error;

/// Failure of a remote or local shell execution.
///
/// This is the dominant transient class: distribution retries it up to three
/// times per gear, activation treats it as final for the gear it hit.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command exited with status {status}: {output}")]
    Failed { status: i32, output: String },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("execution I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for collaborator executions
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Errors from the lifecycle orchestrator and its coordinators
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Argument errors: immediately fatal, never retried, no side effects
    #[error("deployment id is required for this operation")]
    MissingDeploymentId,

    #[error("deployment datetime is required for this operation")]
    MissingDeploymentDatetime,

    #[error("gear has no current deployment")]
    NoCurrentDeployment,

    #[error("deployment id {0} does not exist")]
    UnknownDeploymentId(DeploymentId),

    #[error("cartridge {0} is not installed on this gear")]
    UnknownCartridge(String),

    #[error("no prior deployment to roll back to")]
    NoPriorDeployment,

    #[error("deployment id {0} was never deployed - unable to roll back")]
    NeverDeployed(DeploymentId),

    #[error("the initial build for the application failed: {message}\n\nLast 10 kB of build output:\n{log_tail}")]
    InitialBuildFailed { message: String, log_tail: String },

    #[error("artifact distribution failed on {} gear(s)", .0.failed_count())]
    DistributionFailed(AggregateResult),

    #[error("activation failed on {} gear(s)", .0.failed_count())]
    ActivationFailed(AggregateResult),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
