//! Collaborator contracts.
//!
//! Everything the orchestrator cannot do itself - running cartridge hooks,
//! git plumbing, gear start/stop, persisted gear state, remote command
//! transport, bounded local shells - sits behind one of these narrow traits.
//! The core depends solely on the contracts, so every collaborator has a
//! substitutable double (see [`crate::doubles`]) and production process-backed
//! implementations (see [`crate::runners`]).

use crate::error::ExecResult;
use async_trait::async_trait;
use gantry_types::{Cartridge, DeployOptions, GearAddress, GearEnv, GearState};
use std::path::Path;
use std::time::Duration;

/// Options for a gated control hook invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHookOptions {
    /// Environment overrides layered over the gear environment
    pub env_overrides: GearEnv,
    /// Whether user pre-action hooks run around the control hook
    pub pre_action_hooks_enabled: bool,
    /// Whether user post-action hooks run around the control hook
    pub post_action_hooks_enabled: bool,
    /// Whether same-named user action hooks are prefixed onto the output
    pub prefix_action_hooks: bool,
}

impl Default for ControlHookOptions {
    fn default() -> Self {
        Self {
            env_overrides: GearEnv::new(),
            pre_action_hooks_enabled: true,
            post_action_hooks_enabled: true,
            prefix_action_hooks: true,
        }
    }
}

impl ControlHookOptions {
    /// Both action-hook gates closed; the common shape for internal
    /// maintenance hooks like `update-configuration`.
    pub fn hooks_disabled() -> Self {
        Self {
            pre_action_hooks_enabled: false,
            post_action_hooks_enabled: false,
            ..Self::default()
        }
    }

    pub fn with_env(mut self, env: GearEnv) -> Self {
        self.env_overrides = env;
        self
    }
}

/// The cartridge layer: gated control hooks, ungated action hooks, and the
/// install-time entry points.
#[async_trait]
pub trait CartridgeHooks: Send + Sync {
    /// Run a control hook on a cartridge, returning its textual output.
    async fn control(
        &self,
        hook: &str,
        cartridge: &Cartridge,
        options: &ControlHookOptions,
    ) -> ExecResult<String>;

    /// Run an action hook. Action hooks always run; they are not conditioned
    /// on control-hook gating.
    async fn action(
        &self,
        hook: &str,
        env_overrides: &GearEnv,
        options: &DeployOptions,
    ) -> ExecResult<String>;

    /// Install-time configure of a cartridge.
    async fn configure(
        &self,
        name: &str,
        template_git_url: Option<&str>,
        manifest: Option<&str>,
    ) -> ExecResult<String>;

    /// Install-time post-configure of a cartridge.
    async fn post_configure(&self, name: &str) -> ExecResult<String>;

    /// First-activation `post-install` carrying the cartridge's version
    /// identity.
    async fn post_install(&self, cartridge: &Cartridge, software_version: &str)
        -> ExecResult<String>;
}

/// Options for starting or stopping a gear's cartridges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartStopOptions {
    pub user_initiated: bool,
    pub hot_deploy: bool,
    /// Leave the gear's own web proxy running so a single-gear app keeps its
    /// registry entry through the stop
    pub exclude_web_proxy: bool,
    pub primary_only: bool,
    pub secondary_only: bool,
}

/// Gear process control and container permission management
#[async_trait]
pub trait GearRuntime: Send + Sync {
    async fn start_gear(&self, options: &StartStopOptions) -> ExecResult<String>;

    async fn stop_gear(&self, options: &StartStopOptions) -> ExecResult<String>;

    /// Open a read-write window on a container path.
    async fn set_rw_permissions(&self, path: &Path) -> ExecResult<()>;

    /// Restore the prior permissions on a container path.
    async fn reset_permissions(&self, path: &Path) -> ExecResult<()>;
}

/// Git repository operations on the gear's application repo
#[async_trait]
pub trait Repository: Send + Sync {
    /// Archive the given ref into a deployment's repo directory.
    async fn archive(&self, dest_dir: &Path, git_ref: &str) -> ExecResult<()>;

    /// Resolve a ref to a sha. An empty string means "no git source" and is
    /// not an error.
    async fn sha1(&self, git_ref: &str) -> ExecResult<String>;

    /// Push the repository to sibling gears so sources match before a build.
    async fn sync_to(&self, addresses: &[GearAddress], env: &GearEnv) -> ExecResult<()>;
}

/// The persistent gear-state store
#[async_trait]
pub trait GearStateStore: Send + Sync {
    async fn get(&self) -> ExecResult<GearState>;

    async fn set(&self, state: GearState) -> ExecResult<()>;
}

/// Remote command transport to child gears.
///
/// The core only ever hands over a command string and a target address and
/// gets back combined output; success is exit status 0.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, target: &GearAddress, command: &str, env: &GearEnv) -> ExecResult<String>;

    /// Copy a local tree to a path relative to the target gear's container.
    async fn copy_tree(
        &self,
        target: &GearAddress,
        local_src: &Path,
        remote_rel: &str,
    ) -> ExecResult<()>;
}

/// Bounded local shell execution
#[async_trait]
pub trait Shell: Send + Sync {
    /// Run a command with combined output appended to `log_path`, demanding
    /// exit status 0, bounded by `timeout`.
    async fn run_logged(
        &self,
        command: &str,
        env: &GearEnv,
        cwd: &Path,
        timeout: Duration,
        log_path: &Path,
    ) -> ExecResult<()>;

    /// Extract an uploaded artifact archive into a directory.
    async fn extract_archive(
        &self,
        archive: &Path,
        dest_dir: &Path,
        env: &GearEnv,
    ) -> ExecResult<String>;

    /// Last `bytes` bytes of a file; shorter files come back whole.
    async fn tail(&self, path: &Path, bytes: u64) -> ExecResult<String>;
}
