//! Activation coordinator: drain, cut over, and re-admit each replica gear.
//!
//! Per gear the sequence proxy-disable -> remote-activate -> proxy-enable is
//! strictly ordered and never runs concurrently with itself; across gears the
//! sequences are independent and run in parallel behind a join barrier.

use crate::error::{OrchestratorError, Result};
use crate::lifecycle::Orchestrator;
use crate::traits::RemoteExecutor;
use gantry_registry::{ProxyAction, ProxyStatusPort};
use gantry_store::load_gear_env;
use gantry_types::{
    env, AggregateResult, DeployOptions, DeploymentId, GearAddress, GearEnv, GearRole,
    OperationResult, OperationStatus, DEPLOYED,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

impl Orchestrator {
    /// Activate a prepared deployment across the application.
    ///
    /// A gear whose application DNS differs from its own gear DNS is a
    /// non-elected member of a scaled tier and must not drive activation:
    /// the answer is success with zero results and no remote calls. The
    /// elected gear cuts itself over first (skipped when the store already
    /// shows the requested id current and deployed - `post_receive` has the
    /// landing gear activated before it fans out) and then activates every
    /// target child gear.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn activate(&self, opts: &DeployOptions) -> Result<AggregateResult> {
        let gear_env = load_gear_env(&self.gear.container_dir).await?;
        if gear_env.get(env::APP_DNS) != gear_env.get(env::GEAR_DNS) {
            info!(gear = %self.gear.uuid, "Not the elected proxy gear; skipping activation");
            return Ok(AggregateResult::empty_success());
        }

        let id = opts
            .deployment_id
            .clone()
            .ok_or(OrchestratorError::MissingDeploymentId)?;
        let datetime = self
            .store
            .datetime_for_id(&id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownDeploymentId(id.clone()))?;

        let already_active = self.store.current_deployment_datetime().await?
            == Some(datetime.clone())
            && self.store.read_metadata(&datetime, "state").await?.as_deref() == Some(DEPLOYED);
        if !already_active {
            self.activate_gear(opts).await?;
        }

        let targets = if opts.gears.is_empty() {
            self.child_gear_addresses(GearRole::Proxy).await?
        } else {
            opts.gears.clone()
        };
        if targets.is_empty() {
            return Ok(AggregateResult::empty_success());
        }

        let mut tasks = JoinSet::new();
        for target in targets {
            let proxy = Arc::clone(&self.proxy);
            let remote = Arc::clone(&self.remote);
            let env = gear_env.clone();
            let id = id.clone();
            let hot_deploy = opts.hot_deploy;
            let init = opts.init;
            tasks.spawn(async move {
                activate_remote_gear(proxy, remote, target, env, id, hot_deploy, init).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Activation task aborted"),
            }
        }
        Ok(AggregateResult::from_results(results))
    }
}

/// Activate one remote gear: take it out of rotation, issue the activation
/// command, and re-admit it.
///
/// Under `hot_deploy` neither proxy toggle happens - the gear never leaves
/// rotation. A disable failure aborts before the command: a gear assumed to
/// still be draining is never mutated. A command failure deliberately does
/// not re-enable the proxy - an unknown-state gear stays out of rotation
/// until remediated. An enable failure after successful activation is still
/// a failure for this gear: correct code that is not serving must surface.
pub(crate) async fn activate_remote_gear(
    proxy: Arc<dyn ProxyStatusPort>,
    remote: Arc<dyn RemoteExecutor>,
    target: GearAddress,
    env: GearEnv,
    id: DeploymentId,
    hot_deploy: bool,
    init: bool,
) -> OperationResult {
    let uuid = target.uuid().clone();
    let mut result = OperationResult::success(uuid.clone());

    if !hot_deploy {
        let disabled = proxy.update(ProxyAction::Disable, &uuid, false).await;
        let disabled_ok = disabled.is_success();
        result.messages.extend(disabled.messages);
        result.errors.extend(disabled.errors);
        if !disabled_ok {
            result.status = OperationStatus::Failure;
            return result;
        }
    }

    let mut command = format!(
        "gear activate {id} {}",
        if hot_deploy {
            "--hot-deploy"
        } else {
            "--no-hot-deploy"
        }
    );
    if init {
        command.push_str(" --init");
    }

    match remote.run(&target, &command, &env).await {
        Ok(output) => result.messages.push(output),
        Err(e) => {
            warn!(gear = %target, error = %e, "Remote activation failed; gear left out of rotation");
            result.errors.push(e.to_string());
            result.status = OperationStatus::Failure;
            return result;
        }
    }

    if !hot_deploy {
        let enabled = proxy.update(ProxyAction::Enable, &uuid, false).await;
        let enabled_ok = enabled.is_success();
        result.messages.extend(enabled.messages);
        result.errors.extend(enabled.errors);
        if !enabled_ok {
            result.status = OperationStatus::Failure;
        }
    }

    result
}
