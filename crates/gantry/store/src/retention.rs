//! Deployment retention policy and cleanup

use crate::deployments::DeploymentStore;
use crate::error::Result;
use gantry_types::{DeploymentDatetime, GearEnv};
use tracing::info;

/// Gear environment override for the retained-deployment count
pub const KEEP_DEPLOYMENTS_VAR: &str = "GANTRY_KEEP_DEPLOYMENTS";

/// How many deployments (including the active one) a gear retains
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    default_keep: usize,
}

impl RetentionPolicy {
    /// A policy always keeps at least the active deployment.
    pub fn new(default_keep: usize) -> Self {
        Self {
            default_keep: default_keep.max(1),
        }
    }

    /// Policy lookup: the gear environment may override the node default.
    /// Always >= 1.
    pub fn deployments_to_keep(&self, env: &GearEnv) -> usize {
        env.get(KEEP_DEPLOYMENTS_VAR)
            .and_then(|v| v.parse::<usize>().ok())
            .map(|n| n.max(1))
            .unwrap_or(self.default_keep)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Purge deployments strictly older than `reference` that fall outside the
/// retention window.
///
/// With N retained in total, the newest N - 1 deployments older than the
/// reference survive alongside it. The active deployment is never deleted:
/// its id-link is the live one. Victims get their id unlinked before their
/// tree is removed. Returns what was purged.
pub async fn clean_up_deployments_before(
    store: &DeploymentStore,
    policy: &RetentionPolicy,
    env: &GearEnv,
    reference: &DeploymentDatetime,
) -> Result<Vec<DeploymentDatetime>> {
    let keep = policy.deployments_to_keep(env);
    let active = store.current_deployment_datetime().await?;

    // Ascending, strictly older than the reference.
    let older: Vec<DeploymentDatetime> = store
        .all_deployments()
        .await?
        .into_iter()
        .filter(|d| d < reference)
        .collect();

    let surviving = keep - 1;
    if older.len() <= surviving {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    let victim_count = older.len() - surviving;
    for datetime in older.into_iter().take(victim_count) {
        if Some(&datetime) == active.as_ref() {
            continue;
        }
        store.delete_deployment(&datetime).await?;
        removed.push(datetime);
    }

    if !removed.is_empty() {
        info!(purged = removed.len(), keep, "Cleaned up old deployments");
    }
    Ok(removed)
}
