//! Distribution coordinator: artifact fan-out with bounded retry.
//!
//! One task per target gear, retry local to the task, and a join barrier
//! before the aggregate is computed - a stuck or failing gear never blocks
//! or cancels its siblings, and latency is bounded by retry depth, not gear
//! count.

use crate::error::{ExecResult, OrchestratorError, Result};
use crate::lifecycle::Orchestrator;
use crate::traits::RemoteExecutor;
use gantry_store::load_gear_env;
use gantry_types::{
    AggregateResult, DeployOptions, DeploymentDatetime, DeploymentId, GearAddress, GearEnv,
    GearRole, OperationResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

/// Transfer attempts per gear before it is reported failed
const DISTRIBUTE_ATTEMPTS: u32 = 3;

impl Orchestrator {
    /// Fan the prepared artifact out to every replica gear.
    ///
    /// Requires `deployment_id`; missing it is an argument error raised
    /// before any network activity. An empty target list is a genuine no-op:
    /// immediate success with zero results.
    #[instrument(skip_all, fields(gear = %self.gear.uuid))]
    pub async fn distribute(&self, opts: &DeployOptions) -> Result<AggregateResult> {
        let id = opts
            .deployment_id
            .clone()
            .ok_or(OrchestratorError::MissingDeploymentId)?;
        let datetime = self
            .store
            .datetime_for_id(&id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownDeploymentId(id.clone()))?;

        let targets = if opts.gears.is_empty() {
            self.child_gear_addresses(GearRole::Proxy).await?
        } else {
            opts.gears.clone()
        };
        if targets.is_empty() {
            return Ok(AggregateResult::empty_success());
        }

        let gear_env = load_gear_env(&self.gear.container_dir).await?;
        let deployment_dir = self.store.deployment_dir(&datetime);

        let mut tasks = JoinSet::new();
        for target in targets {
            let remote = Arc::clone(&self.remote);
            let env = gear_env.clone();
            let dir = deployment_dir.clone();
            let datetime = datetime.clone();
            let id = id.clone();
            tasks.spawn(async move {
                distribute_to_gear(remote, target, env, dir, datetime, id).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Distribution task aborted"),
            }
        }
        Ok(AggregateResult::from_results(results))
    }

    /// Remote addresses of this application's child gears for a role.
    ///
    /// Without a web proxy cartridge the application is unscaled and the
    /// answer is always empty - the registry is not even consulted. The
    /// local gear never appears in its own target list.
    pub async fn child_gear_addresses(&self, role: GearRole) -> Result<Vec<GearAddress>> {
        if !self.gear.cartridges.has_web_proxy() {
            return Ok(Vec::new());
        }
        let entries = self.registry.entries(role).await?;
        Ok(entries
            .into_iter()
            .filter(|(uuid, _)| uuid != &self.gear.uuid)
            .map(|(uuid, entry)| GearAddress::new(uuid, entry.proxy_hostname))
            .collect())
    }
}

/// Transfer one deployment to one gear, retrying transient failures.
///
/// Any non-erroring attempt succeeds immediately; exhausting all attempts
/// yields a failure for this gear only - the error never escapes past the
/// per-gear result.
pub(crate) async fn distribute_to_gear(
    remote: Arc<dyn RemoteExecutor>,
    target: GearAddress,
    env: GearEnv,
    deployment_dir: PathBuf,
    datetime: DeploymentDatetime,
    id: DeploymentId,
) -> OperationResult {
    let mut last_error = String::new();
    for attempt in 1..=DISTRIBUTE_ATTEMPTS {
        match attempt_distribute(remote.as_ref(), &target, &env, &deployment_dir, &datetime, &id)
            .await
        {
            Ok(output) => {
                return OperationResult::success(target.uuid().clone()).with_message(output);
            }
            Err(e) => {
                warn!(gear = %target, attempt, error = %e, "Artifact transfer attempt failed");
                last_error = e.to_string();
            }
        }
    }
    OperationResult::failure(target.uuid().clone()).with_error(last_error)
}

/// One transfer attempt: copy the deployment tree, then register its id link
/// on the receiving gear.
async fn attempt_distribute(
    remote: &dyn RemoteExecutor,
    target: &GearAddress,
    env: &GearEnv,
    deployment_dir: &std::path::Path,
    datetime: &DeploymentDatetime,
    id: &DeploymentId,
) -> ExecResult<String> {
    remote
        .copy_tree(
            target,
            deployment_dir,
            &format!("app-deployments/{datetime}"),
        )
        .await?;
    remote
        .run(target, &format!("gear link-deployment {id} {datetime}"), env)
        .await
}
