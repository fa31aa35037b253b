//! The deployment lifecycle state machine.
//!
//! One [`Orchestrator`] drives one gear through a push or config event:
//! pre-receive, post-receive (build, prepare, local activation, then the
//! scaled fan-outs), install-time configure/post-configure, and rollback.
//! A layer above this core serializes runs per gear, so local state
//! transitions here are unguarded.

use crate::error::{ExecError, OrchestratorError, Result};
use crate::traits::{
    CartridgeHooks, ControlHookOptions, GearRuntime, GearStateStore, RemoteExecutor, Repository,
    Shell, StartStopOptions,
};
use gantry_registry::{GearRegistry, ProxyStatusPort};
use gantry_store::{
    clean_up_deployments_before, load_env_dir, load_gear_env, CurrentPointer, DeploymentStore,
    RetentionPolicy,
};
use gantry_types::{
    env, Countdown, DeployOptions, DeploymentId, Gear, GearRole, GearState, DEPLOYED,
    NO_CLONE_SENTINEL,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Fixed log file for the out-of-process initial build
pub const INITIAL_BUILD_LOG: &str = "initial-build.log";

/// Directory of uploaded artifact files under the container
pub const APP_ARCHIVES_DIR: &str = "app-archives";

/// How much of the initial-build log a failure surfaces
const LOG_TAIL_BYTES: u64 = 10240;

/// Tunables for one orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retention policy for past deployments
    pub retention: RetentionPolicy,
    /// Shared budget for the sequential initial-build commands
    pub initial_build_budget: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            initial_build_budget: Duration::from_secs(300),
        }
    }
}

/// The per-gear deployment lifecycle orchestrator
pub struct Orchestrator {
    pub(crate) gear: Gear,
    pub(crate) store: DeploymentStore,
    pub(crate) config: OrchestratorConfig,
    pub(crate) hooks: Arc<dyn CartridgeHooks>,
    pub(crate) runtime: Arc<dyn GearRuntime>,
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) state: Arc<dyn GearStateStore>,
    pub(crate) registry: Arc<dyn GearRegistry>,
    pub(crate) proxy: Arc<dyn ProxyStatusPort>,
    pub(crate) remote: Arc<dyn RemoteExecutor>,
    pub(crate) shell: Arc<dyn Shell>,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gear: Gear,
        config: OrchestratorConfig,
        hooks: Arc<dyn CartridgeHooks>,
        runtime: Arc<dyn GearRuntime>,
        repository: Arc<dyn Repository>,
        state: Arc<dyn GearStateStore>,
        registry: Arc<dyn GearRegistry>,
        proxy: Arc<dyn ProxyStatusPort>,
        remote: Arc<dyn RemoteExecutor>,
        shell: Arc<dyn Shell>,
    ) -> Self {
        let store = DeploymentStore::new(&gear.container_dir);
        Self {
            gear,
            store,
            config,
            hooks,
            runtime,
            repository,
            state,
            registry,
            proxy,
            remote,
            shell,
        }
    }

    pub fn gear(&self) -> &Gear {
        &self.gear
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.store
    }

    // ========== Receive ==========

    /// Prepare the gear for inbound code transfer.
    ///
    /// A configured builder cartridge owns the whole flow; otherwise the gear
    /// is stopped, leaving its own web proxy running so a single-gear app's
    /// registry entry survives the push.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn pre_receive(&self, opts: &DeployOptions) -> Result<String> {
        if let Some(builder) = &self.gear.cartridges.builder {
            let output = self
                .hooks
                .control("pre-receive", builder, &ControlHookOptions::default())
                .await?;
            return Ok(output);
        }

        let output = self
            .runtime
            .stop_gear(&StartStopOptions {
                user_initiated: true,
                hot_deploy: opts.hot_deploy,
                exclude_web_proxy: true,
                ..Default::default()
            })
            .await?;
        Ok(output)
    }

    /// Drive the pushed code to a running state on this gear and, when
    /// scaled, across every child gear.
    ///
    /// Build analytics are emitted at the end of every run, success or not;
    /// they never gate the outcome.
    #[instrument(skip_all, fields(gear = %self.gear.uuid, hot_deploy = opts.hot_deploy))]
    pub async fn post_receive(&self, opts: &mut DeployOptions) -> Result<String> {
        let result = self.post_receive_inner(opts).await;
        self.report_build_analytics();
        result
    }

    async fn post_receive_inner(&self, opts: &mut DeployOptions) -> Result<String> {
        let caps = self.gear.cartridges.capabilities(opts.hot_deploy);
        let mut output = String::new();

        if let Some(builder) = &self.gear.cartridges.builder {
            output.push_str(
                &self
                    .hooks
                    .control("post-receive", builder, &ControlHookOptions::default())
                    .await?,
            );
            return Ok(output);
        }

        let datetime = if opts.hot_deploy {
            self.store
                .current_deployment_datetime()
                .await?
                .ok_or(OrchestratorError::NoCurrentDeployment)?
        } else {
            self.store.create_deployment().await?
        };
        opts.deployment_datetime = Some(datetime.clone());

        // Cartridge-managed state flushes into the archive before we take it.
        self.hooks
            .control(
                "pre-repo-archive",
                &self.gear.cartridges.primary,
                &ControlHookOptions::hooks_disabled(),
            )
            .await?;

        self.repository
            .archive(&self.store.repo_dir(&datetime), opts.git_ref())
            .await?;
        let sha = self.repository.sha1(opts.git_ref()).await?;
        if !sha.is_empty() {
            self.store.write_metadata(&datetime, "git_sha1", &sha).await?;
            self.store
                .write_metadata(&datetime, "git_ref", opts.git_ref())
                .await?;
        }

        if caps.has_web_proxy {
            // Replica sources must match before anything builds against them.
            let gear_env = load_gear_env(&self.gear.container_dir).await?;
            let proxies = self.child_gear_addresses(GearRole::Proxy).await?;
            if !proxies.is_empty() {
                self.repository.sync_to(&proxies, &gear_env).await?;
            }
        }

        output.push_str(&self.build(opts).await?);
        output.push_str(&self.prepare(opts).await?);
        output.push_str(&self.activate_gear(opts).await?);

        if caps.has_web_proxy {
            let distributed = self.distribute(opts).await?;
            if !distributed.is_success() {
                return Err(OrchestratorError::DistributionFailed(distributed));
            }
            let activated = self.activate(opts).await?;
            if !activated.is_success() {
                return Err(OrchestratorError::ActivationFailed(activated));
            }
        }

        Ok(output)
    }

    // ========== Build & prepare ==========

    /// Run the primary cartridge's build sequence against the target
    /// deployment.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn build(&self, opts: &DeployOptions) -> Result<String> {
        let datetime = opts
            .deployment_datetime
            .clone()
            .ok_or(OrchestratorError::MissingDeploymentDatetime)?;

        self.state.set(GearState::Building).await?;

        // Existing artifacts must see consistent dependencies even if the
        // hooks below fail.
        self.store
            .point_current(CurrentPointer::Dependencies, &datetime)
            .await?;
        self.store
            .point_current(CurrentPointer::BuildDependencies, &datetime)
            .await?;

        let gear_env = load_gear_env(&self.gear.container_dir).await?;
        let keep = self.config.retention.deployments_to_keep(&gear_env);

        let mut env_overrides = gantry_types::GearEnv::new();
        env_overrides.insert(
            env::REPO_DIR.to_string(),
            format!("{}/", self.store.repo_dir(&datetime).display()),
        );

        let mut output = String::new();
        match self.run_build_hooks(&env_overrides, &mut output).await {
            Ok(()) => Ok(output),
            Err(e) if keep > 1 => {
                // A previous known-good deployment is retained: restart from
                // it rather than leave the app down, and report the failure.
                warn!(error = %e, "Build failed; restarting gear from previous deployment");
                output.push_str(&format!("Build failed: {e}\n"));
                output.push_str(
                    &self
                        .runtime
                        .start_gear(&StartStopOptions {
                            user_initiated: true,
                            hot_deploy: opts.hot_deploy,
                            exclude_web_proxy: true,
                            ..Default::default()
                        })
                        .await?,
                );
                Ok(output)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_build_hooks(
        &self,
        env_overrides: &gantry_types::GearEnv,
        output: &mut String,
    ) -> std::result::Result<(), ExecError> {
        let primary = &self.gear.cartridges.primary;

        output.push_str(
            &self
                .hooks
                .control(
                    "update-configuration",
                    primary,
                    &ControlHookOptions::hooks_disabled().with_env(env_overrides.clone()),
                )
                .await?,
        );

        let build_hook_opts = ControlHookOptions {
            pre_action_hooks_enabled: false,
            prefix_action_hooks: false,
            env_overrides: env_overrides.clone(),
            ..Default::default()
        };
        output.push_str(&self.hooks.control("pre-build", primary, &build_hook_opts).await?);
        output.push_str(&self.hooks.control("build", primary, &build_hook_opts).await?);
        Ok(())
    }

    /// Turn the target deployment into an addressable artifact: run the
    /// `prepare` action hook, then persist the content-derived id.
    ///
    /// On success `opts.deployment_id` is set. If the `id` metadata write
    /// fails the id link is removed again and the options are left without a
    /// deployment id - no partial id exposure.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn prepare(&self, opts: &mut DeployOptions) -> Result<String> {
        let datetime = opts
            .deployment_datetime
            .clone()
            .ok_or(OrchestratorError::MissingDeploymentDatetime)?;

        let gear_env = load_gear_env(&self.gear.container_dir).await?;
        let mut output = String::new();

        if let Some(file) = &opts.file {
            let archive = self.gear.container_dir.join(APP_ARCHIVES_DIR).join(file);
            output.push_str(
                &self
                    .shell
                    .extract_archive(&archive, &self.store.repo_dir(&datetime), &gear_env)
                    .await?,
            );
        }

        let mut env_overrides = gantry_types::GearEnv::new();
        env_overrides.insert(
            env::REPO_DIR.to_string(),
            self.store.repo_dir(&datetime).display().to_string(),
        );
        output.push_str(&self.hooks.action("prepare", &env_overrides, opts).await?);

        let id = self.store.compute_deployment_id(&datetime).await?;
        self.store.link_id(&datetime, &id).await?;
        if let Err(write_err) = self.store.write_metadata(&datetime, "id", id.as_str()).await {
            if let Err(unlink_err) = self.store.unlink_id(&id).await {
                warn!(id = %id, error = %unlink_err, "Failed to unlink deployment id during compensation");
            }
            return Err(write_err.into());
        }
        opts.deployment_id = Some(id.clone());

        output.push_str(&format!(
            "Prepared deployment artifacts in {}\n",
            self.store.deployment_dir(&datetime).display()
        ));
        output.push_str(&format!("Deployment id is {id}"));

        info!(deployment = %datetime, id = %id, "Prepared deployment");
        Ok(output)
    }

    // ========== Local activation ==========

    /// Cut this gear over to the target deployment.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn activate_gear(&self, opts: &DeployOptions) -> Result<String> {
        let datetime = match &opts.deployment_id {
            Some(id) => self
                .store
                .datetime_for_id(id)
                .await?
                .ok_or_else(|| OrchestratorError::UnknownDeploymentId(id.clone()))?,
            None => opts
                .deployment_datetime
                .clone()
                .ok_or(OrchestratorError::MissingDeploymentDatetime)?,
        };

        let mut output = String::new();
        if self.state.get().await? == GearState::Started {
            output.push_str(
                &self
                    .runtime
                    .stop_gear(&StartStopOptions {
                        user_initiated: true,
                        hot_deploy: opts.hot_deploy,
                        exclude_web_proxy: true,
                        ..Default::default()
                    })
                    .await?,
            );
        }

        self.store.point_current(CurrentPointer::Repo, &datetime).await?;
        self.store
            .point_current(CurrentPointer::Dependencies, &datetime)
            .await?;

        let primary = &self.gear.cartridges.primary;
        self.hooks
            .control(
                "update-configuration",
                primary,
                &ControlHookOptions::hooks_disabled(),
            )
            .await?;

        output.push_str(&format!(
            "Starting application {}\n",
            self.gear.application_name
        ));
        output.push_str(
            &self
                .runtime
                .start_gear(&StartStopOptions {
                    secondary_only: true,
                    user_initiated: true,
                    exclude_web_proxy: true,
                    hot_deploy: opts.hot_deploy,
                    ..Default::default()
                })
                .await?,
        );

        self.state.set(GearState::Deploying).await?;

        let deploy_hook_opts = ControlHookOptions {
            pre_action_hooks_enabled: false,
            prefix_action_hooks: false,
            ..Default::default()
        };
        output.push_str(&self.hooks.control("deploy", primary, &deploy_hook_opts).await?);
        output.push_str(
            &self
                .runtime
                .start_gear(&StartStopOptions {
                    primary_only: true,
                    user_initiated: true,
                    exclude_web_proxy: true,
                    hot_deploy: opts.hot_deploy,
                    ..Default::default()
                })
                .await?,
        );
        output.push_str(&self.hooks.control("post-deploy", primary, &deploy_hook_opts).await?);

        if opts.init {
            self.run_post_install(opts).await?;
        }

        self.store.write_metadata(&datetime, "state", DEPLOYED).await?;

        let gear_env = load_gear_env(&self.gear.container_dir).await?;
        clean_up_deployments_before(&self.store, &self.config.retention, &gear_env, &datetime)
            .await?;

        if self.gear.cartridges.has_web_proxy() {
            let enabled = self
                .proxy
                .update(gantry_registry::ProxyAction::Enable, &self.gear.uuid, false)
                .await;
            if !enabled.is_success() {
                warn!(gear = %self.gear.uuid, "Failed to re-enable local gear in proxy registry");
                output.push_str("Warning: failed to enable gear in proxy registry\n");
            }
        }

        info!(deployment = %datetime, "Activated deployment on local gear");
        Ok(output)
    }

    /// First activation after install loads the primary cartridge's persisted
    /// environment and hands its version identity to `post-install`.
    async fn run_post_install(&self, _opts: &DeployOptions) -> Result<()> {
        let primary = &self.gear.cartridges.primary;
        let cart_env_dir = self
            .gear
            .container_dir
            .join(&primary.directory)
            .join("env");
        let cart_env = load_env_dir(&cart_env_dir).await?;

        // Ident shape: vendor:name:version:cartridge-version
        let software_version = cart_env
            .iter()
            .find(|(key, _)| key.ends_with(env::IDENT_SUFFIX))
            .and_then(|(_, ident)| ident.split(':').nth(2))
            .map(str::to_string);

        match software_version {
            Some(version) => {
                self.hooks.post_install(primary, &version).await?;
                Ok(())
            }
            None => {
                warn!(cartridge = %primary.name, "No ident found; skipping post-install");
                Ok(())
            }
        }
    }

    // ========== Install-time configuration ==========

    /// Install-time configure: delegate to the cartridge layer, then refresh
    /// dependency pointers to the latest deployment.
    #[instrument(skip_all, fields(gear = %self.gear.uuid, cartridge = name))]
    pub async fn configure(
        &self,
        name: &str,
        template_git_url: Option<&str>,
        manifest: Option<&str>,
    ) -> Result<String> {
        let output = self.hooks.configure(name, template_git_url, manifest).await?;

        if let Some(latest) = self.store.latest_deployment_datetime().await? {
            self.store
                .point_current(CurrentPointer::Dependencies, &latest)
                .await?;
            self.store
                .point_current(CurrentPointer::BuildDependencies, &latest)
                .await?;
        }
        Ok(output)
    }

    /// First-activation-on-install flow for a newly added cartridge.
    #[instrument(skip_all, fields(gear = %self.gear.uuid, cartridge = name))]
    pub async fn post_configure(&self, name: &str, template_git_url: Option<&str>) -> Result<String> {
        let cartridge = self
            .gear
            .cartridges
            .get(name)
            .ok_or_else(|| OrchestratorError::UnknownCartridge(name.to_string()))?
            .clone();

        let url = template_git_url.filter(|u| !u.is_empty());
        let build_requested =
            cartridge.install_build_required || url.is_some_and(|u| u != NO_CLONE_SENTINEL);

        let mut output = String::new();
        if build_requested && cartridge.buildable {
            output.push_str(&self.initial_build().await?);
        } else if let Some(latest) = self.store.latest_deployment_datetime().await? {
            let state = self.store.read_metadata(&latest, "state").await?;
            let skip = state.as_deref() == Some(DEPLOYED) || cartridge.is_web_proxy();
            if !skip {
                let deployments_dir = self.store.deployments_dir();
                self.runtime.set_rw_permissions(&deployments_dir).await?;
                let activation = self.first_activation(&latest, url).await;
                let restore = self.runtime.reset_permissions(&deployments_dir).await;
                activation?;
                restore?;
            }
        }

        output.push_str(&self.hooks.post_configure(name).await?);
        Ok(output)
    }

    async fn first_activation(
        &self,
        latest: &gantry_types::DeploymentDatetime,
        url: Option<&str>,
    ) -> Result<()> {
        let mut prepare_opts = DeployOptions::default().with_datetime(latest.clone());
        self.prepare(&mut prepare_opts).await?;

        self.store.point_current(CurrentPointer::Repo, latest).await?;
        self.store.write_metadata(latest, "state", DEPLOYED).await?;

        if url != Some(NO_CLONE_SENTINEL) {
            let sha = self.repository.sha1("master").await?;
            if !sha.is_empty() {
                self.store.write_metadata(latest, "git_sha1", &sha).await?;
                self.store.write_metadata(latest, "git_ref", "master").await?;
            }
        }
        Ok(())
    }

    /// Out-of-process initial build: `gear prereceive` then `gear
    /// postreceive`, each bounded by the remaining slice of one shared
    /// countdown, appending to the fixed build log. Failure is fatal and
    /// carries the tail of the log for diagnosis.
    async fn initial_build(&self) -> Result<String> {
        let gear_env = load_gear_env(&self.gear.container_dir).await?;
        let countdown = Countdown::new(self.config.initial_build_budget);
        let log_path = self.gear.container_dir.join(INITIAL_BUILD_LOG);

        info!(gear = %self.gear.uuid, "Running initial build");

        let steps = async {
            self.shell
                .run_logged(
                    "gear prereceive",
                    &gear_env,
                    &self.gear.container_dir,
                    countdown.remaining(),
                    &log_path,
                )
                .await?;
            self.shell
                .run_logged(
                    "gear postreceive",
                    &gear_env,
                    &self.gear.container_dir,
                    countdown.remaining(),
                    &log_path,
                )
                .await?;
            Ok::<(), ExecError>(())
        };

        match steps.await {
            Ok(()) => Ok(String::new()),
            Err(e) => {
                let log_tail = self
                    .shell
                    .tail(&log_path, LOG_TAIL_BYTES)
                    .await
                    .unwrap_or_default();
                Err(OrchestratorError::InitialBuildFailed {
                    message: e.to_string(),
                    log_tail,
                })
            }
        }
    }

    // ========== Rollback ==========

    /// Roll the application back to a previously deployed snapshot.
    ///
    /// With an explicit `deployment_id` that deployment is the target and it
    /// must have been deployed before. Without one, the most recent
    /// deployment strictly before the current one with `state=DEPLOYED` is
    /// chosen; having none is fatal.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn rollback(&self, opts: &DeployOptions) -> Result<String> {
        let mut output = String::new();

        let target = match &opts.deployment_id {
            Some(id) => {
                let datetime = self
                    .store
                    .datetime_for_id(id)
                    .await?
                    .ok_or_else(|| OrchestratorError::UnknownDeploymentId(id.clone()))?;
                let state = self.store.read_metadata(&datetime, "state").await?;
                if state.as_deref() != Some(DEPLOYED) {
                    return Err(OrchestratorError::NeverDeployed(id.clone()));
                }
                id.clone()
            }
            None => {
                output.push_str("Looking up previous deployment\n");
                self.previous_deployed_id().await?
            }
        };

        output.push_str(&format!("Rolling back to deployment ID {target}\n"));

        let mut rollback_opts = opts.clone();
        rollback_opts.deployment_id = Some(target);
        let result = self.activate(&rollback_opts).await?;
        if !result.is_success() {
            return Err(OrchestratorError::ActivationFailed(result));
        }
        Ok(output)
    }

    /// Most recent deployment strictly before the current one that was
    /// actually deployed, by recorded id.
    async fn previous_deployed_id(&self) -> Result<DeploymentId> {
        let current = self
            .store
            .current_deployment_datetime()
            .await?
            .ok_or(OrchestratorError::NoPriorDeployment)?;

        let mut candidates = self.store.all_deployments().await?;
        candidates.retain(|d| d < &current);
        candidates.reverse();

        for datetime in candidates {
            let deployed =
                self.store.read_metadata(&datetime, "state").await?.as_deref() == Some(DEPLOYED);
            if !deployed {
                continue;
            }
            if let Some(id) = self.store.read_metadata(&datetime, "id").await? {
                return Ok(DeploymentId::new(id));
            }
        }
        Err(OrchestratorError::NoPriorDeployment)
    }

    // ========== Convenience ==========

    /// Full deploy: `pre_receive` then `post_receive` with the same options.
    pub async fn deploy(&self, opts: &mut DeployOptions) -> Result<String> {
        let mut output = self.pre_receive(opts).await?;
        output.push_str(&self.post_receive(opts).await?);
        Ok(output)
    }

    /// Build analytics event; a pure side effect that never gates the run.
    pub(crate) fn report_build_analytics(&self) {
        info!(
            target: "gantry::analytics",
            app = %self.gear.application_name,
            gear = %self.gear.uuid,
            namespace = %self.gear.namespace,
            "build_complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RigConfig, TestRig};
    use gantry_types::{DeploymentDatetime, GearUuid};

    fn opts() -> DeployOptions {
        DeployOptions::default()
    }

    // ===== pre_receive =====

    #[tokio::test]
    async fn test_pre_receive_default_stops_gear_excluding_web_proxy() {
        let rig = TestRig::new().await;

        rig.orchestrator.pre_receive(&opts()).await.unwrap();

        let stops = rig.runtime.stop_calls();
        assert_eq!(stops.len(), 1);
        assert!(stops[0].user_initiated);
        assert!(stops[0].exclude_web_proxy);
        assert!(!stops[0].hot_deploy);
        assert!(rig.hooks.control_hooks().is_empty());
    }

    #[tokio::test]
    async fn test_pre_receive_builder_owns_the_flow() {
        let rig = TestRig::build(RigConfig {
            builder: true,
            ..Default::default()
        })
        .await;

        rig.orchestrator.pre_receive(&opts()).await.unwrap();

        let calls = rig.hooks.control_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "pre-receive");
        assert_eq!(calls[0].1, "builder-1.0");
        assert!(rig.runtime.stop_calls().is_empty());
    }

    // ===== post_receive =====

    #[tokio::test]
    async fn test_post_receive_builder_delegates_without_archiving() {
        let rig = TestRig::build(RigConfig {
            builder: true,
            ..Default::default()
        })
        .await;

        let mut options = opts();
        rig.orchestrator.post_receive(&mut options).await.unwrap();

        assert_eq!(rig.hooks.control_hooks(), vec!["post-receive".to_string()]);
        assert!(rig.repository.archive_calls().is_empty());
        assert!(options.deployment_datetime.is_none());
    }

    #[tokio::test]
    async fn test_post_receive_nonscaled_runs_full_local_sequence() {
        let rig = TestRig::new().await;

        let mut options = opts();
        rig.orchestrator.post_receive(&mut options).await.unwrap();

        let datetime = options.deployment_datetime.clone().expect("datetime resolved");
        let store = rig.orchestrator.store();

        // Archived the default ref into the new deployment's repo dir.
        let archives = rig.repository.archive_calls();
        assert_eq!(archives, vec![(store.repo_dir(&datetime), "master".to_string())]);

        // Git metadata recorded from the resolved sha.
        assert_eq!(
            store.read_metadata(&datetime, "git_sha1").await.unwrap(),
            Some("abcd1234".to_string())
        );
        assert_eq!(
            store.read_metadata(&datetime, "git_ref").await.unwrap(),
            Some("master".to_string())
        );

        // Hook order: archive prep, then the build hooks, then activation.
        assert_eq!(
            rig.hooks.control_hooks(),
            vec![
                "pre-repo-archive",
                "update-configuration",
                "pre-build",
                "build",
                "update-configuration",
                "deploy",
                "post-deploy",
            ]
        );
        assert_eq!(rig.hooks.action_calls()[0].0, "prepare");

        // Building then Deploying, and the deployment ends marked DEPLOYED.
        assert_eq!(
            rig.state.history(),
            vec![GearState::Building, GearState::Deploying]
        );
        assert_eq!(
            store.read_metadata(&datetime, "state").await.unwrap(),
            Some(DEPLOYED.to_string())
        );

        // The prepared id is linked and exposed on the options.
        let id = options.deployment_id.expect("deployment id set");
        assert_eq!(store.datetime_for_id(&id).await.unwrap(), Some(datetime));

        // Unscaled: nothing remote happened.
        assert!(rig.remote.copy_calls().is_empty());
        assert!(rig.remote.run_calls().is_empty());
        assert!(rig.repository.sync_calls().is_empty());
    }

    #[tokio::test]
    async fn test_post_receive_hot_deploy_reuses_current_deployment() {
        let rig = TestRig::new().await;
        let current = rig.seeded_active_deployment("aaaa1111").await;

        let mut options = opts();
        options.hot_deploy = true;
        rig.orchestrator.post_receive(&mut options).await.unwrap();

        assert_eq!(options.deployment_datetime, Some(current.clone()));
        // No new deployment directory was allocated.
        assert_eq!(
            rig.orchestrator.store().all_deployments().await.unwrap(),
            vec![current]
        );
    }

    #[tokio::test]
    async fn test_post_receive_empty_sha_omits_git_metadata() {
        let rig = TestRig::new().await;
        rig.repository.set_sha1("");

        let mut options = opts();
        rig.orchestrator.post_receive(&mut options).await.unwrap();

        let datetime = options.deployment_datetime.expect("datetime resolved");
        let store = rig.orchestrator.store();
        assert_eq!(store.read_metadata(&datetime, "git_sha1").await.unwrap(), None);
        assert_eq!(store.read_metadata(&datetime, "git_ref").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_post_receive_scaled_syncs_sources_and_fans_out() {
        let rig = TestRig::scaled().await;
        rig.registry
            .insert(GearRole::Proxy, GearUuid::new("5504"), "localhost");

        let mut options = opts();
        rig.orchestrator.post_receive(&mut options).await.unwrap();

        // Sources were pushed to the proxy-role child before building.
        let syncs = rig.repository.sync_calls();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0][0].to_string(), "5504@localhost");

        // The artifact was distributed and the child activated.
        assert!(!rig.remote.copy_calls().is_empty());
        let id = options.deployment_id.expect("deployment id set");
        assert!(rig
            .remote
            .run_calls()
            .iter()
            .any(|(_, cmd)| cmd == &format!("gear activate {id} --no-hot-deploy")));

        // The local gear was re-admitted to the proxy tier.
        assert!(rig.proxy.is_enabled(&GearUuid::new("5503")));
    }

    // ===== build =====

    #[tokio::test]
    async fn test_build_concatenates_hook_output_in_order() {
        let rig = TestRig::new().await;
        rig.hooks.set_output("update-configuration", "update-configuration|");
        rig.hooks.set_output("pre-build", "pre-build|");
        rig.hooks.set_output("build", "build");

        let store = rig.orchestrator.store();
        let datetime = store.create_deployment().await.unwrap();
        let options = opts().with_datetime(datetime.clone());

        let output = rig.orchestrator.build(&options).await.unwrap();

        assert_eq!(output, "update-configuration|pre-build|build");
        assert_eq!(rig.state.history(), vec![GearState::Building]);

        // Dependency pointers moved before any hook ran, and the repo dir
        // override carries a trailing slash.
        let calls = rig.hooks.control_calls();
        let update_env = &calls[0].2.env_overrides;
        assert!(update_env[env::REPO_DIR].ends_with("/repo/"));
        assert!(!calls[0].2.pre_action_hooks_enabled);
        assert!(!calls[0].2.post_action_hooks_enabled);
        assert!(!calls[1].2.pre_action_hooks_enabled);
        assert!(!calls[1].2.prefix_action_hooks);
    }

    #[tokio::test]
    async fn test_build_failure_with_single_retained_deployment_propagates() {
        let rig = TestRig::new().await;
        rig.hooks.fail_on("pre-build");

        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();
        let result = rig.orchestrator.build(&opts().with_datetime(datetime)).await;

        assert!(result.is_err());
        // No safe fallback exists: the gear stays stopped.
        assert!(rig.runtime.start_calls().is_empty());
        // The later hooks were aborted.
        assert!(!rig.hooks.control_hooks().contains(&"build".to_string()));
    }

    #[tokio::test]
    async fn test_build_failure_with_retained_fallback_restarts_gear() {
        let rig = TestRig::build(RigConfig {
            keep_deployments: 2,
            ..Default::default()
        })
        .await;
        rig.hooks.fail_on("pre-build");

        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();
        let output = rig
            .orchestrator
            .build(&opts().with_datetime(datetime))
            .await
            .unwrap();

        assert!(output.contains("Build failed"));
        let starts = rig.runtime.start_calls();
        assert_eq!(starts.len(), 1);
        assert!(starts[0].user_initiated);
        assert!(starts[0].exclude_web_proxy);
    }

    #[tokio::test]
    async fn test_build_requires_deployment_datetime() {
        let rig = TestRig::new().await;
        let result = rig.orchestrator.build(&opts()).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::MissingDeploymentDatetime)
        ));
    }

    // ===== prepare =====

    #[tokio::test]
    async fn test_prepare_links_id_and_sets_it_on_options() {
        let rig = TestRig::new().await;
        rig.hooks.set_output("prepare", "output from prepare hook\n");

        let store = rig.orchestrator.store();
        let datetime = store.create_deployment().await.unwrap();
        tokio::fs::write(store.repo_dir(&datetime).join("index.html"), "hi")
            .await
            .unwrap();

        let mut options = opts().with_datetime(datetime.clone());
        let output = rig.orchestrator.prepare(&mut options).await.unwrap();

        let id = options.deployment_id.expect("deployment id set");
        assert_eq!(store.datetime_for_id(&id).await.unwrap(), Some(datetime.clone()));
        assert_eq!(
            store.read_metadata(&datetime, "id").await.unwrap(),
            Some(id.as_str().to_string())
        );
        assert!(output.starts_with("output from prepare hook\n"));
        assert!(output.contains("Prepared deployment artifacts in"));
        assert!(output.contains(&format!("Deployment id is {id}")));

        // The prepare action hook saw the un-slashed repo dir override.
        let (hook, env_overrides) = &rig.hooks.action_calls()[0];
        assert_eq!(hook, "prepare");
        assert!(env_overrides[env::REPO_DIR].ends_with("/repo"));
    }

    #[tokio::test]
    async fn test_prepare_metadata_failure_unlinks_id_and_leaves_options_unset() {
        let rig = TestRig::new().await;
        let store = rig.orchestrator.store();
        let datetime = store.create_deployment().await.unwrap();
        // A directory squatting on the metadata key makes the write fail
        // after the id link exists.
        tokio::fs::create_dir_all(store.deployment_dir(&datetime).join("metadata/id"))
            .await
            .unwrap();

        let expected_id = store.compute_deployment_id(&datetime).await.unwrap();
        let mut options = opts().with_datetime(datetime.clone());
        let result = rig.orchestrator.prepare(&mut options).await;

        assert!(result.is_err());
        assert!(options.deployment_id.is_none());
        // Compensation removed the id link: no dangling id.
        assert_eq!(store.datetime_for_id(&expected_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prepare_extraction_failure_propagates_before_any_hook() {
        let rig = TestRig::new().await;
        rig.shell.fail_extract();

        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();
        let mut options = opts().with_datetime(datetime);
        options.file = Some("app.tar.gz".to_string());

        let result = rig.orchestrator.prepare(&mut options).await;

        assert!(result.is_err());
        assert!(rig.hooks.action_calls().is_empty());
        assert!(options.deployment_id.is_none());
    }

    #[tokio::test]
    async fn test_prepare_extracts_uploaded_artifact_into_repo() {
        let rig = TestRig::new().await;
        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();

        let mut options = opts().with_datetime(datetime);
        options.file = Some("app.tar.gz".to_string());
        rig.orchestrator.prepare(&mut options).await.unwrap();

        let extracts = rig.shell.extract_calls();
        assert_eq!(
            extracts,
            vec![rig.dir.path().join(APP_ARCHIVES_DIR).join("app.tar.gz")]
        );
        assert_eq!(rig.hooks.action_calls().len(), 1);
    }

    // ===== activate_gear (local cutover) =====

    #[tokio::test]
    async fn test_activate_gear_stops_started_gear_first() {
        let rig = TestRig::new().await;
        rig.state.set(GearState::Started).await.unwrap();

        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();
        let output = rig
            .orchestrator
            .activate_gear(&opts().with_datetime(datetime))
            .await
            .unwrap();

        assert!(output.starts_with("stop\n"));
        let stops = rig.runtime.stop_calls();
        assert_eq!(stops.len(), 1);
        assert!(stops[0].exclude_web_proxy);
        assert!(output.contains("Starting application deploytest"));
    }

    #[tokio::test]
    async fn test_activate_gear_skips_stop_when_already_stopped() {
        let rig = TestRig::new().await;

        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();
        rig.orchestrator
            .activate_gear(&opts().with_datetime(datetime))
            .await
            .unwrap();

        assert!(rig.runtime.stop_calls().is_empty());
        // Secondary cartridges start before the deploy hook, primary after.
        let starts = rig.runtime.start_calls();
        assert_eq!(starts.len(), 2);
        assert!(starts[0].secondary_only);
        assert!(starts[1].primary_only);
    }

    #[tokio::test]
    async fn test_activate_gear_init_runs_post_install_with_version_identity() {
        let rig = TestRig::new().await;
        let cart_env_dir = rig.dir.path().join("mock-0.1/env");
        tokio::fs::create_dir_all(&cart_env_dir).await.unwrap();
        tokio::fs::write(cart_env_dir.join("GANTRY_MOCK_IDENT"), "redhat:mock:0.1:0.1\n")
            .await
            .unwrap();

        let datetime = rig.orchestrator.store().create_deployment().await.unwrap();
        let mut options = opts().with_datetime(datetime);
        options.init = true;
        rig.orchestrator.activate_gear(&options).await.unwrap();

        assert_eq!(
            rig.hooks.post_install_calls(),
            vec![("mock-0.1".to_string(), "0.1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_activate_gear_marks_deployed_and_cleans_up() {
        let rig = TestRig::new().await;
        let store = rig.orchestrator.store();
        let stale = store.create_deployment().await.unwrap();
        let datetime = store.create_deployment().await.unwrap();

        rig.orchestrator
            .activate_gear(&opts().with_datetime(datetime.clone()))
            .await
            .unwrap();

        assert_eq!(
            store.read_metadata(&datetime, "state").await.unwrap(),
            Some(DEPLOYED.to_string())
        );
        // Retention of 1: the superseded deployment was purged.
        assert!(!store.all_deployments().await.unwrap().contains(&stale));
        assert_eq!(store.current_deployment_datetime().await.unwrap(), Some(datetime));
    }

    // ===== configure / post_configure =====

    #[tokio::test]
    async fn test_configure_delegates_then_refreshes_dependency_pointers() {
        let rig = TestRig::new().await;
        let store = rig.orchestrator.store();
        let latest = store.create_deployment().await.unwrap();

        rig.orchestrator
            .configure("mock-0.1", None, None)
            .await
            .unwrap();

        // The dependencies pointer now resolves inside the latest deployment.
        let link = rig.dir.path().join("app-root/runtime/dependencies");
        let target = tokio::fs::read_link(&link).await.unwrap();
        assert!(target.to_string_lossy().contains(latest.as_str()));
    }

    #[tokio::test]
    async fn test_post_configure_is_noop_when_already_deployed() {
        let rig = TestRig::new().await;
        rig.seeded_active_deployment("abcd1234").await;

        rig.orchestrator
            .post_configure("mock-0.1", None)
            .await
            .unwrap();

        assert!(rig.hooks.action_calls().is_empty());
        assert!(rig.runtime.set_rw_calls().is_empty());
        assert!(rig.runtime.reset_calls().is_empty());
        // The cartridge layer's post-configure still runs.
        assert_eq!(rig.hooks.post_configure_calls(), vec!["mock-0.1".to_string()]);
    }

    #[tokio::test]
    async fn test_post_configure_is_noop_for_web_proxy_cartridge() {
        let rig = TestRig::scaled().await;
        rig.orchestrator.store().create_deployment().await.unwrap();

        rig.orchestrator
            .post_configure("webproxy-1.4", None)
            .await
            .unwrap();

        assert!(rig.hooks.action_calls().is_empty());
        assert!(rig.runtime.set_rw_calls().is_empty());
        assert_eq!(
            rig.hooks.post_configure_calls(),
            vec!["webproxy-1.4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_post_configure_first_activation_deploys_latest_in_place() {
        let rig = TestRig::new().await;
        let store = rig.orchestrator.store();
        let latest = store.create_deployment().await.unwrap();
        tokio::fs::write(store.repo_dir(&latest).join("index.html"), "hi")
            .await
            .unwrap();

        rig.orchestrator
            .post_configure("mock-0.1", None)
            .await
            .unwrap();

        // Prepared in place, repo pointer moved, marked deployed.
        assert_eq!(rig.hooks.action_calls()[0].0, "prepare");
        assert_eq!(store.current_deployment_datetime().await.unwrap(), Some(latest.clone()));
        assert_eq!(
            store.read_metadata(&latest, "state").await.unwrap(),
            Some(DEPLOYED.to_string())
        );
        // Git-sourced install records sha metadata.
        assert_eq!(
            store.read_metadata(&latest, "git_sha1").await.unwrap(),
            Some("abcd1234".to_string())
        );

        // The permission window opened and closed around the mutation.
        let deployments_dir = store.deployments_dir();
        assert_eq!(rig.runtime.set_rw_calls(), vec![deployments_dir.clone()]);
        assert_eq!(rig.runtime.reset_calls(), vec![deployments_dir]);
        assert_eq!(rig.hooks.post_configure_calls(), vec!["mock-0.1".to_string()]);
    }

    #[tokio::test]
    async fn test_post_configure_no_clone_sentinel_skips_build_and_git_metadata() {
        let rig = TestRig::new().await;
        let store = rig.orchestrator.store();
        let latest = store.create_deployment().await.unwrap();

        rig.orchestrator
            .post_configure("mock-0.1", Some(NO_CLONE_SENTINEL))
            .await
            .unwrap();

        // No out-of-process build, and no git metadata for a no-clone install.
        assert!(rig.shell.run_calls().is_empty());
        assert_eq!(store.read_metadata(&latest, "git_sha1").await.unwrap(), None);
        assert_eq!(
            store.read_metadata(&latest, "state").await.unwrap(),
            Some(DEPLOYED.to_string())
        );
    }

    #[tokio::test]
    async fn test_post_configure_install_build_runs_bounded_commands() {
        let rig = TestRig::build(RigConfig {
            install_build_required: true,
            ..Default::default()
        })
        .await;

        rig.orchestrator
            .post_configure("mock-0.1", None)
            .await
            .unwrap();

        let runs = rig.shell.run_calls();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, "gear prereceive");
        assert_eq!(runs[1].0, "gear postreceive");
        // Sequential steps share one countdown: the second slice is smaller.
        assert!(runs[1].1 <= runs[0].1);
        // The build owns deployment creation; no in-place first activation.
        assert!(rig.hooks.action_calls().is_empty());
        assert_eq!(rig.hooks.post_configure_calls(), vec!["mock-0.1".to_string()]);
    }

    #[tokio::test]
    async fn test_post_configure_clone_url_triggers_build() {
        let rig = TestRig::new().await;

        rig.orchestrator
            .post_configure("mock-0.1", Some("git://example.com/app.git"))
            .await
            .unwrap();

        assert_eq!(rig.shell.run_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_post_configure_build_failure_surfaces_log_tail() {
        let rig = TestRig::build(RigConfig {
            install_build_required: true,
            ..Default::default()
        })
        .await;
        rig.shell.fail_command("gear postreceive");
        rig.shell.set_tail_output("some output");

        let result = rig.orchestrator.post_configure("mock-0.1", None).await;

        match result {
            Err(OrchestratorError::InitialBuildFailed { log_tail, .. }) => {
                assert_eq!(log_tail, "some output");
            }
            other => panic!("expected InitialBuildFailed, got {other:?}"),
        }
    }

    // ===== rollback =====

    async fn deployed_with_id(rig: &TestRig, id: &str) -> DeploymentDatetime {
        let store = rig.orchestrator.store();
        let datetime = store.create_deployment().await.unwrap();
        let id = DeploymentId::new(id);
        store.link_id(&datetime, &id).await.unwrap();
        store.write_metadata(&datetime, "id", id.as_str()).await.unwrap();
        store.write_metadata(&datetime, "state", DEPLOYED).await.unwrap();
        datetime
    }

    #[tokio::test]
    async fn test_rollback_targets_most_recent_previously_deployed() {
        let rig = TestRig::build(RigConfig {
            keep_deployments: 3,
            ..Default::default()
        })
        .await;
        let store = rig.orchestrator.store();

        let previous = deployed_with_id(&rig, "a1b2c3d4").await;
        // A never-deployed snapshot in between must be skipped.
        store.create_deployment().await.unwrap();
        rig.seeded_active_deployment("ffff0000").await;

        let output = rig.orchestrator.rollback(&opts()).await.unwrap();

        assert!(output.contains("Looking up previous deployment"));
        assert!(output.contains("Rolling back to deployment ID a1b2c3d4"));
        assert_eq!(
            store.current_deployment_datetime().await.unwrap(),
            Some(previous)
        );
    }

    #[tokio::test]
    async fn test_rollback_without_prior_deployment_is_fatal() {
        let rig = TestRig::new().await;
        rig.seeded_active_deployment("ffff0000").await;

        let result = rig.orchestrator.rollback(&opts()).await;

        assert!(matches!(result, Err(OrchestratorError::NoPriorDeployment)));
    }

    #[tokio::test]
    async fn test_rollback_to_never_deployed_id_is_fatal() {
        let rig = TestRig::new().await;
        let store = rig.orchestrator.store();
        let datetime = store.create_deployment().await.unwrap();
        let id = DeploymentId::new("a1b2c3d4");
        store.link_id(&datetime, &id).await.unwrap();

        let mut options = opts();
        options.deployment_id = Some(id);
        let result = rig.orchestrator.rollback(&options).await;

        assert!(matches!(result, Err(OrchestratorError::NeverDeployed(_))));
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_id_is_fatal() {
        let rig = TestRig::new().await;

        let mut options = opts();
        options.deployment_id = Some(DeploymentId::new("nope0000"));
        let result = rig.orchestrator.rollback(&options).await;

        assert!(matches!(
            result,
            Err(OrchestratorError::UnknownDeploymentId(_))
        ));
    }

    // ===== deploy =====

    #[tokio::test]
    async fn test_deploy_runs_pre_then_post_receive() {
        let rig = TestRig::new().await;

        let mut options = opts();
        rig.orchestrator.deploy(&mut options).await.unwrap();

        assert_eq!(rig.runtime.stop_calls().len(), 1);
        assert!(options.deployment_id.is_some());
    }
}
