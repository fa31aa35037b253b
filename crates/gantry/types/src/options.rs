//! Options threaded through one deployment lifecycle run

use crate::ids::{DeploymentDatetime, DeploymentId, GearAddress};
use serde::{Deserialize, Serialize};

/// Mutable options for a single push/config event.
///
/// The orchestrator fills fields in as the run progresses: `post_receive`
/// resolves `deployment_datetime`, `prepare` sets `deployment_id` on success
/// (and deliberately leaves it unset when metadata persistence fails).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Target deployment, resolved by `post_receive` or supplied by a caller
    pub deployment_datetime: Option<DeploymentDatetime>,
    /// Content-derived id, set by `prepare` once persisted
    pub deployment_id: Option<DeploymentId>,
    /// In-place code swap without leaving load-balancer rotation
    pub hot_deploy: bool,
    /// First activation after cartridge install
    pub init: bool,
    /// Discard cached build artifacts before building
    pub force_clean_build: bool,
    /// Git ref to archive; `master` when unset
    pub git_ref: Option<String>,
    /// Uploaded artifact file (under `app-archives/`) to extract in `prepare`
    pub file: Option<String>,
    /// Explicit fan-out targets; defaults to registry lookup when empty
    pub gears: Vec<GearAddress>,
}

impl DeployOptions {
    pub fn with_datetime(mut self, datetime: DeploymentDatetime) -> Self {
        self.deployment_datetime = Some(datetime);
        self
    }

    pub fn with_deployment_id(mut self, id: DeploymentId) -> Self {
        self.deployment_id = Some(id);
        self
    }

    pub fn git_ref(&self) -> &str {
        self.git_ref.as_deref().unwrap_or("master")
    }
}
