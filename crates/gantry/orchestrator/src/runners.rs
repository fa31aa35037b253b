//! Process-backed production implementations of the collaborator contracts.
//!
//! These are deliberately thin: the orchestrator owns sequencing and error
//! policy, so each runner just executes one external tool and reports exit
//! status and combined output.

use crate::error::{ExecError, ExecResult};
use crate::traits::{
    CartridgeHooks, ControlHookOptions, GearRuntime, GearStateStore, RemoteExecutor, Repository,
    Shell, StartStopOptions,
};
use async_trait::async_trait;
use gantry_store::{load_gear_env, StoreError};
use gantry_types::{Cartridge, CartridgeSet, DeployOptions, GearAddress, GearEnv, GearState};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

fn store_io(err: StoreError) -> ExecError {
    let StoreError::Io(e) = err;
    ExecError::Io(e)
}

async fn run_command(mut cmd: Command) -> ExecResult<String> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let output = cmd.output().await?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(combined)
    } else {
        Err(ExecError::Failed {
            status: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

/// Local shell bounded by a timeout, logging to a fixed file
pub struct ProcessShell;

#[async_trait]
impl Shell for ProcessShell {
    async fn run_logged(
        &self,
        command: &str,
        env: &GearEnv,
        cwd: &Path,
        timeout: Duration,
        log_path: &Path,
    ) -> ExecResult<()> {
        let shell_command = format!("{command} >> {} 2>&1", log_path.display());
        debug!(command, timeout_secs = timeout.as_secs(), "Running bounded shell command");

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&shell_command)
            .envs(env)
            .current_dir(cwd)
            .spawn()?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!(command, error = %e, "Failed to kill timed-out command");
                }
                return Err(ExecError::Timeout(timeout));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Failed {
                status: status.code().unwrap_or(-1),
                output: String::new(),
            })
        }
    }

    async fn extract_archive(
        &self,
        archive: &Path,
        dest_dir: &Path,
        env: &GearEnv,
    ) -> ExecResult<String> {
        let mut cmd = Command::new("tar");
        cmd.arg("-xzf")
            .arg(archive)
            .arg("-C")
            .arg(dest_dir)
            .envs(env);
        run_command(cmd).await
    }

    async fn tail(&self, path: &Path, bytes: u64) -> ExecResult<String> {
        let contents = tokio::fs::read(path).await?;
        let start = contents.len().saturating_sub(bytes as usize);
        Ok(String::from_utf8_lossy(&contents[start..]).into_owned())
    }
}

/// Remote command transport over ssh/rsync
pub struct SshRemoteExecutor {
    ssh: PathBuf,
    rsync: PathBuf,
}

impl SshRemoteExecutor {
    pub fn new(ssh: impl Into<PathBuf>, rsync: impl Into<PathBuf>) -> Self {
        Self {
            ssh: ssh.into(),
            rsync: rsync.into(),
        }
    }
}

impl Default for SshRemoteExecutor {
    fn default() -> Self {
        Self::new("/usr/bin/ssh", "/usr/bin/rsync")
    }
}

#[async_trait]
impl RemoteExecutor for SshRemoteExecutor {
    async fn run(&self, target: &GearAddress, command: &str, env: &GearEnv) -> ExecResult<String> {
        let mut cmd = Command::new(&self.ssh);
        cmd.arg(target.to_string()).arg(command).envs(env);
        run_command(cmd).await
    }

    async fn copy_tree(
        &self,
        target: &GearAddress,
        local_src: &Path,
        remote_rel: &str,
    ) -> ExecResult<()> {
        let mut cmd = Command::new(&self.rsync);
        cmd.arg("-az")
            .arg("--delete")
            .arg(format!("{}/", local_src.display()))
            .arg(format!("{target}:{remote_rel}/"));
        run_command(cmd).await.map(|_| ())
    }
}

/// Cartridge hooks as executables under each cartridge's `hooks/` directory.
///
/// A missing hook script is a no-op, not an error; cartridges implement only
/// the hooks they care about.
pub struct ScriptHookRunner {
    container_dir: PathBuf,
}

impl ScriptHookRunner {
    pub fn new(container_dir: impl Into<PathBuf>) -> Self {
        Self {
            container_dir: container_dir.into(),
        }
    }

    async fn run_script(&self, script: PathBuf, overrides: &GearEnv) -> ExecResult<String> {
        if !script.exists() {
            return Ok(String::new());
        }
        let mut env = load_gear_env(&self.container_dir).await.map_err(store_io)?;
        env.extend(overrides.clone());

        let mut cmd = Command::new(&script);
        cmd.envs(&env).current_dir(&self.container_dir);
        run_command(cmd).await
    }
}

#[async_trait]
impl CartridgeHooks for ScriptHookRunner {
    async fn control(
        &self,
        hook: &str,
        cartridge: &Cartridge,
        options: &ControlHookOptions,
    ) -> ExecResult<String> {
        let script = self
            .container_dir
            .join(&cartridge.directory)
            .join("hooks")
            .join(hook);
        self.run_script(script, &options.env_overrides).await
    }

    async fn action(
        &self,
        hook: &str,
        env_overrides: &GearEnv,
        _options: &DeployOptions,
    ) -> ExecResult<String> {
        let script = self
            .container_dir
            .join("app-root/runtime/repo/.gantry/action_hooks")
            .join(hook);
        self.run_script(script, env_overrides).await
    }

    async fn configure(
        &self,
        name: &str,
        _template_git_url: Option<&str>,
        _manifest: Option<&str>,
    ) -> ExecResult<String> {
        let script = self.container_dir.join(name).join("hooks/configure");
        self.run_script(script, &GearEnv::new()).await
    }

    async fn post_configure(&self, name: &str) -> ExecResult<String> {
        let script = self.container_dir.join(name).join("hooks/post-configure");
        self.run_script(script, &GearEnv::new()).await
    }

    async fn post_install(
        &self,
        cartridge: &Cartridge,
        software_version: &str,
    ) -> ExecResult<String> {
        let script = self
            .container_dir
            .join(&cartridge.directory)
            .join("hooks/post-install");
        if !script.exists() {
            return Ok(String::new());
        }
        let env = load_gear_env(&self.container_dir).await.map_err(store_io)?;
        let mut cmd = Command::new(&script);
        cmd.arg(software_version)
            .envs(&env)
            .current_dir(&self.container_dir);
        run_command(cmd).await
    }
}

/// Gear start/stop through each cartridge's `bin/control` executable
pub struct ProcessGearRuntime {
    container_dir: PathBuf,
    cartridges: CartridgeSet,
}

impl ProcessGearRuntime {
    pub fn new(container_dir: impl Into<PathBuf>, cartridges: CartridgeSet) -> Self {
        Self {
            container_dir: container_dir.into(),
            cartridges,
        }
    }

    fn selected(&self, options: &StartStopOptions) -> Vec<&Cartridge> {
        let mut carts: Vec<&Cartridge> = Vec::new();
        if !options.primary_only {
            if let Some(proxy) = &self.cartridges.web_proxy {
                if !options.exclude_web_proxy {
                    carts.push(proxy);
                }
            }
        }
        if !options.secondary_only {
            carts.push(&self.cartridges.primary);
        }
        carts
    }

    async fn control_each(
        &self,
        action: &str,
        options: &StartStopOptions,
    ) -> ExecResult<String> {
        let env = load_gear_env(&self.container_dir).await.map_err(store_io)?;
        let mut output = String::new();
        for cartridge in self.selected(options) {
            let script = self
                .container_dir
                .join(&cartridge.directory)
                .join("bin/control");
            if !script.exists() {
                continue;
            }
            let mut cmd = Command::new(&script);
            cmd.arg(action).envs(&env).current_dir(&self.container_dir);
            output.push_str(&run_command(cmd).await?);
        }
        Ok(output)
    }
}

#[async_trait]
impl GearRuntime for ProcessGearRuntime {
    async fn start_gear(&self, options: &StartStopOptions) -> ExecResult<String> {
        self.control_each("start", options).await
    }

    async fn stop_gear(&self, options: &StartStopOptions) -> ExecResult<String> {
        self.control_each("stop", options).await
    }

    async fn set_rw_permissions(&self, path: &Path) -> ExecResult<()> {
        set_mode(path, 0o750).await
    }

    async fn reset_permissions(&self, path: &Path) -> ExecResult<()> {
        set_mode(path, 0o550).await
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> ExecResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> ExecResult<()> {
    Ok(())
}

/// Proxy membership toggling through the web proxy cartridge's control
/// script (`control enable-server <uuid>` / `control disable-server <uuid>`).
///
/// An unscaled gear has no script and every update is a vacuous success.
pub struct ScriptProxyStatusPort {
    container_dir: PathBuf,
    script: Option<PathBuf>,
}

impl ScriptProxyStatusPort {
    pub fn new(container_dir: impl Into<PathBuf>, web_proxy: Option<&Cartridge>) -> Self {
        let container_dir = container_dir.into();
        let script = web_proxy.map(|cart| container_dir.join(&cart.directory).join("bin/control"));
        Self {
            container_dir,
            script,
        }
    }
}

#[async_trait]
impl gantry_registry::ProxyStatusPort for ScriptProxyStatusPort {
    async fn update(
        &self,
        action: gantry_registry::ProxyAction,
        gear: &gantry_types::GearUuid,
        persist: bool,
    ) -> gantry_types::OperationResult {
        let Some(script) = &self.script else {
            return gantry_types::OperationResult::success(gear.clone());
        };
        let verb = match action {
            gantry_registry::ProxyAction::Enable => "enable-server",
            gantry_registry::ProxyAction::Disable => "disable-server",
        };
        let mut cmd = Command::new(script);
        cmd.arg(verb).arg(gear.as_str()).current_dir(&self.container_dir);
        if persist {
            cmd.arg("--persist");
        }
        match run_command(cmd).await {
            Ok(output) => gantry_types::OperationResult::success(gear.clone()).with_message(output),
            Err(e) => {
                warn!(gear = %gear, action = verb, error = %e, "Proxy status update failed");
                gantry_types::OperationResult::failure(gear.clone()).with_error(e.to_string())
            }
        }
    }
}

/// Gear state persisted as a single file under the container
pub struct FileGearStateStore {
    path: PathBuf,
}

impl FileGearStateStore {
    pub fn new(container_dir: &Path) -> Self {
        Self {
            path: container_dir.join("app-root/runtime/.state"),
        }
    }
}

#[async_trait]
impl GearStateStore for FileGearStateStore {
    async fn get(&self) -> ExecResult<GearState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(GearState::Stopped);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(match raw.trim() {
            "started" => GearState::Started,
            "building" => GearState::Building,
            "deploying" => GearState::Deploying,
            _ => GearState::Stopped,
        })
    }

    async fn set(&self, state: GearState) -> ExecResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, format!("{state}\n")).await?;
        Ok(())
    }
}

/// Git plumbing over the gear's bare repository
pub struct GitRepository {
    repo_dir: PathBuf,
}

impl GitRepository {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn archive(&self, dest_dir: &Path, git_ref: &str) -> ExecResult<()> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(format!(
            "git archive --format=tar {git_ref} | tar -x -C {}",
            dest_dir.display()
        ));
        cmd.current_dir(&self.repo_dir);
        run_command(cmd).await.map(|_| ())
    }

    async fn sha1(&self, git_ref: &str) -> ExecResult<String> {
        let mut cmd = Command::new("git");
        cmd.arg("rev-parse").arg(git_ref).current_dir(&self.repo_dir);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            // An unresolvable ref means "no git source", not a failure.
            Ok(String::new())
        }
    }

    async fn sync_to(&self, addresses: &[GearAddress], _env: &GearEnv) -> ExecResult<()> {
        for target in addresses {
            let mut cmd = Command::new("/usr/bin/rsync");
            cmd.arg("-az")
                .arg("--delete")
                .arg(format!("{}/", self.repo_dir.display()))
                .arg(format!("{target}:git/"));
            run_command(cmd).await?;
        }
        Ok(())
    }
}
