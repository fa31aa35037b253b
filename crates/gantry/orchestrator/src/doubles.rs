//! In-memory collaborator doubles.
//!
//! Every contract in [`crate::traits`] has a recording double here so the
//! lifecycle can be exercised without a cartridge tree, git, ssh, or a
//! proxy tier. Failures are primed per hook, per command, or per target.

use crate::error::{ExecError, ExecResult};
use crate::traits::{
    CartridgeHooks, ControlHookOptions, GearRuntime, GearStateStore, RemoteExecutor, Repository,
    Shell, StartStopOptions,
};
use async_trait::async_trait;
use gantry_types::{Cartridge, DeployOptions, GearAddress, GearEnv, GearState};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

fn exec_failure(what: &str) -> ExecError {
    ExecError::Failed {
        status: 1,
        output: format!("{what} failed"),
    }
}

/// Recording cartridge-hook double with per-hook scripted output and failure
#[derive(Default)]
pub struct MockHooks {
    outputs: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    control_calls: Mutex<Vec<(String, String, ControlHookOptions)>>,
    action_calls: Mutex<Vec<(String, GearEnv)>>,
    configure_calls: Mutex<Vec<String>>,
    post_configure_calls: Mutex<Vec<String>>,
    post_install_calls: Mutex<Vec<(String, String)>>,
}

impl MockHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of a named hook.
    pub fn set_output(&self, hook: &str, output: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(hook.to_string(), output.to_string());
    }

    /// Prime a named hook to fail.
    pub fn fail_on(&self, hook: &str) {
        self.failing.lock().unwrap().insert(hook.to_string());
    }

    /// `(hook, cartridge, options)` control invocations, in order.
    pub fn control_calls(&self) -> Vec<(String, String, ControlHookOptions)> {
        self.control_calls.lock().unwrap().clone()
    }

    /// Control hook names only, in order.
    pub fn control_hooks(&self) -> Vec<String> {
        self.control_calls().into_iter().map(|(h, _, _)| h).collect()
    }

    pub fn action_calls(&self) -> Vec<(String, GearEnv)> {
        self.action_calls.lock().unwrap().clone()
    }

    pub fn post_configure_calls(&self) -> Vec<String> {
        self.post_configure_calls.lock().unwrap().clone()
    }

    pub fn post_install_calls(&self) -> Vec<(String, String)> {
        self.post_install_calls.lock().unwrap().clone()
    }

    fn respond(&self, hook: &str) -> ExecResult<String> {
        if self.failing.lock().unwrap().contains(hook) {
            return Err(exec_failure(hook));
        }
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(hook)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CartridgeHooks for MockHooks {
    async fn control(
        &self,
        hook: &str,
        cartridge: &Cartridge,
        options: &ControlHookOptions,
    ) -> ExecResult<String> {
        self.control_calls.lock().unwrap().push((
            hook.to_string(),
            cartridge.name.clone(),
            options.clone(),
        ));
        self.respond(hook)
    }

    async fn action(
        &self,
        hook: &str,
        env_overrides: &GearEnv,
        _options: &DeployOptions,
    ) -> ExecResult<String> {
        self.action_calls
            .lock()
            .unwrap()
            .push((hook.to_string(), env_overrides.clone()));
        self.respond(hook)
    }

    async fn configure(
        &self,
        name: &str,
        _template_git_url: Option<&str>,
        _manifest: Option<&str>,
    ) -> ExecResult<String> {
        self.configure_calls.lock().unwrap().push(name.to_string());
        self.respond("configure")
    }

    async fn post_configure(&self, name: &str) -> ExecResult<String> {
        self.post_configure_calls
            .lock()
            .unwrap()
            .push(name.to_string());
        self.respond("post-configure")
    }

    async fn post_install(
        &self,
        cartridge: &Cartridge,
        software_version: &str,
    ) -> ExecResult<String> {
        self.post_install_calls
            .lock()
            .unwrap()
            .push((cartridge.name.clone(), software_version.to_string()));
        self.respond("post-install")
    }
}

/// Recording gear-runtime double
#[derive(Default)]
pub struct MockRuntime {
    start_calls: Mutex<Vec<StartStopOptions>>,
    stop_calls: Mutex<Vec<StartStopOptions>>,
    set_rw_calls: Mutex<Vec<PathBuf>>,
    reset_calls: Mutex<Vec<PathBuf>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_calls(&self) -> Vec<StartStopOptions> {
        self.start_calls.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> Vec<StartStopOptions> {
        self.stop_calls.lock().unwrap().clone()
    }

    pub fn set_rw_calls(&self) -> Vec<PathBuf> {
        self.set_rw_calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) -> Vec<PathBuf> {
        self.reset_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GearRuntime for MockRuntime {
    async fn start_gear(&self, options: &StartStopOptions) -> ExecResult<String> {
        self.start_calls.lock().unwrap().push(options.clone());
        let which = if options.primary_only {
            "primary"
        } else if options.secondary_only {
            "secondary"
        } else {
            "all"
        };
        Ok(format!("start {which}\n"))
    }

    async fn stop_gear(&self, options: &StartStopOptions) -> ExecResult<String> {
        self.stop_calls.lock().unwrap().push(options.clone());
        Ok("stop\n".to_string())
    }

    async fn set_rw_permissions(&self, path: &Path) -> ExecResult<()> {
        self.set_rw_calls.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn reset_permissions(&self, path: &Path) -> ExecResult<()> {
        self.reset_calls.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Recording repository double; resolves every ref to a configurable sha
pub struct MockRepository {
    sha: Mutex<String>,
    archive_calls: Mutex<Vec<(PathBuf, String)>>,
    sync_calls: Mutex<Vec<Vec<GearAddress>>>,
}

impl Default for MockRepository {
    fn default() -> Self {
        Self {
            sha: Mutex::new("abcd1234".to_string()),
            archive_calls: Mutex::new(Vec::new()),
            sync_calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty sha means "no git source".
    pub fn set_sha1(&self, sha: &str) {
        *self.sha.lock().unwrap() = sha.to_string();
    }

    pub fn archive_calls(&self) -> Vec<(PathBuf, String)> {
        self.archive_calls.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> Vec<Vec<GearAddress>> {
        self.sync_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn archive(&self, dest_dir: &Path, git_ref: &str) -> ExecResult<()> {
        self.archive_calls
            .lock()
            .unwrap()
            .push((dest_dir.to_path_buf(), git_ref.to_string()));
        Ok(())
    }

    async fn sha1(&self, _git_ref: &str) -> ExecResult<String> {
        Ok(self.sha.lock().unwrap().clone())
    }

    async fn sync_to(&self, addresses: &[GearAddress], _env: &GearEnv) -> ExecResult<()> {
        self.sync_calls.lock().unwrap().push(addresses.to_vec());
        Ok(())
    }
}

/// In-memory gear-state store recording every transition
pub struct InMemoryStateStore {
    state: Mutex<GearState>,
    history: Mutex<Vec<GearState>>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(GearState::Stopped),
            history: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_in(state: GearState) -> Self {
        let store = Self::default();
        *store.state.lock().unwrap() = state;
        store
    }

    pub fn history(&self) -> Vec<GearState> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl GearStateStore for InMemoryStateStore {
    async fn get(&self) -> ExecResult<GearState> {
        Ok(*self.state.lock().unwrap())
    }

    async fn set(&self, state: GearState) -> ExecResult<()> {
        *self.state.lock().unwrap() = state;
        self.history.lock().unwrap().push(state);
        Ok(())
    }
}

/// Recording remote executor with per-target primed failures.
///
/// Priming `n` failures makes the first `n` calls against that gear error;
/// `u32::MAX` fails forever.
#[derive(Default)]
pub struct MockRemoteExecutor {
    run_calls: Mutex<Vec<(String, String)>>,
    copy_calls: Mutex<Vec<(String, String)>>,
    run_failures: Mutex<HashMap<String, u32>>,
    copy_failures: Mutex<HashMap<String, u32>>,
}

impl MockRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_run(&self, uuid: &str, times: u32) {
        self.run_failures
            .lock()
            .unwrap()
            .insert(uuid.to_string(), times);
    }

    pub fn fail_copy(&self, uuid: &str, times: u32) {
        self.copy_failures
            .lock()
            .unwrap()
            .insert(uuid.to_string(), times);
    }

    /// `(target, command)` invocations, in order of arrival.
    pub fn run_calls(&self) -> Vec<(String, String)> {
        self.run_calls.lock().unwrap().clone()
    }

    pub fn copy_calls(&self) -> Vec<(String, String)> {
        self.copy_calls.lock().unwrap().clone()
    }

    fn consume_failure(map: &Mutex<HashMap<String, u32>>, uuid: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(uuid) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    async fn run(&self, target: &GearAddress, command: &str, _env: &GearEnv) -> ExecResult<String> {
        self.run_calls
            .lock()
            .unwrap()
            .push((target.to_string(), command.to_string()));
        if Self::consume_failure(&self.run_failures, target.uuid().as_str()) {
            return Err(exec_failure("remote command"));
        }
        Ok("out".to_string())
    }

    async fn copy_tree(
        &self,
        target: &GearAddress,
        _local_src: &Path,
        remote_rel: &str,
    ) -> ExecResult<()> {
        self.copy_calls
            .lock()
            .unwrap()
            .push((target.to_string(), remote_rel.to_string()));
        if Self::consume_failure(&self.copy_failures, target.uuid().as_str()) {
            return Err(exec_failure("artifact transfer"));
        }
        Ok(())
    }
}

/// Recording shell double
#[derive(Default)]
pub struct MockShell {
    run_calls: Mutex<Vec<(String, Duration)>>,
    extract_calls: Mutex<Vec<PathBuf>>,
    failing_commands: Mutex<HashSet<String>>,
    fail_extract: Mutex<bool>,
    tail_output: Mutex<String>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prime a command (matched verbatim) to fail.
    pub fn fail_command(&self, command: &str) {
        self.failing_commands
            .lock()
            .unwrap()
            .insert(command.to_string());
    }

    pub fn fail_extract(&self) {
        *self.fail_extract.lock().unwrap() = true;
    }

    pub fn set_tail_output(&self, output: &str) {
        *self.tail_output.lock().unwrap() = output.to_string();
    }

    pub fn run_calls(&self) -> Vec<(String, Duration)> {
        self.run_calls.lock().unwrap().clone()
    }

    pub fn extract_calls(&self) -> Vec<PathBuf> {
        self.extract_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Shell for MockShell {
    async fn run_logged(
        &self,
        command: &str,
        _env: &GearEnv,
        _cwd: &Path,
        timeout: Duration,
        _log_path: &Path,
    ) -> ExecResult<()> {
        self.run_calls
            .lock()
            .unwrap()
            .push((command.to_string(), timeout));
        if self.failing_commands.lock().unwrap().contains(command) {
            return Err(exec_failure(command));
        }
        Ok(())
    }

    async fn extract_archive(
        &self,
        archive: &Path,
        _dest_dir: &Path,
        _env: &GearEnv,
    ) -> ExecResult<String> {
        self.extract_calls.lock().unwrap().push(archive.to_path_buf());
        if *self.fail_extract.lock().unwrap() {
            return Err(exec_failure("extract"));
        }
        Ok(String::new())
    }

    async fn tail(&self, _path: &Path, _bytes: u64) -> ExecResult<String> {
        Ok(self.tail_output.lock().unwrap().clone())
    }
}
