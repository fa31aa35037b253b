//! The Gantry deployment lifecycle orchestrator.
//!
//! This crate drives the sequence build -> prepare -> distribute -> activate
//! for one gear per run: from freshly pushed application code on a single
//! landing gear to a consistent, load-balanced, running state across every
//! replica gear, with bounded retry, partial-failure aggregation, and
//! rollback.
//!
//! External collaborators - the cartridge hook runner, git plumbing, the
//! gear-state store, the proxy status port, the remote command transport -
//! are reached only through the narrow contracts in [`traits`]; production
//! process-backed implementations live in [`runners`] and recording doubles
//! in [`doubles`].

pub mod activate;
pub mod distribute;
pub mod doubles;
pub mod error;
pub mod lifecycle;
pub mod runners;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ExecError, ExecResult, OrchestratorError, Result};
pub use lifecycle::{Orchestrator, OrchestratorConfig, APP_ARCHIVES_DIR, INITIAL_BUILD_LOG};
pub use traits::{
    CartridgeHooks, ControlHookOptions, GearRuntime, GearStateStore, RemoteExecutor, Repository,
    Shell, StartStopOptions,
};
