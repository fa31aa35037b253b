//! Per-deployment directories, metadata, id links, and current pointers

use crate::error::Result;
use chrono::Utc;
use gantry_types::{DeploymentDatetime, DeploymentId};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory under the container holding all deployment snapshots
pub const DEPLOYMENTS_DIR: &str = "app-deployments";

/// Subdirectory of content-id links (`by-id/<id> -> ../<timestamp>`)
pub const BY_ID_DIR: &str = "by-id";

/// Directory of the current-pointer symlinks
pub const RUNTIME_DIR: &str = "app-root/runtime";

/// Number of hex characters kept from the content hash
const ID_LEN: usize = 8;

/// The named "current" pointers a gear serves from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentPointer {
    Repo,
    Dependencies,
    BuildDependencies,
}

impl CurrentPointer {
    /// Name of both the pointer link and the per-deployment subdirectory it
    /// targets.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Repo => "repo",
            Self::Dependencies => "dependencies",
            Self::BuildDependencies => "build-dependencies",
        }
    }
}

/// Filesystem store for one gear's deployments
#[derive(Debug, Clone)]
pub struct DeploymentStore {
    container_dir: PathBuf,
}

impl DeploymentStore {
    pub fn new(container_dir: impl Into<PathBuf>) -> Self {
        Self {
            container_dir: container_dir.into(),
        }
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.container_dir.join(DEPLOYMENTS_DIR)
    }

    pub fn deployment_dir(&self, datetime: &DeploymentDatetime) -> PathBuf {
        self.deployments_dir().join(datetime.as_str())
    }

    pub fn repo_dir(&self, datetime: &DeploymentDatetime) -> PathBuf {
        self.deployment_dir(datetime).join("repo")
    }

    fn metadata_path(&self, datetime: &DeploymentDatetime, key: &str) -> PathBuf {
        self.deployment_dir(datetime).join("metadata").join(key)
    }

    fn by_id_dir(&self) -> PathBuf {
        self.deployments_dir().join(BY_ID_DIR)
    }

    fn runtime_dir(&self) -> PathBuf {
        self.container_dir.join(RUNTIME_DIR)
    }

    /// Allocate a new deployment: a strictly increasing timestamp token and
    /// the directory tree underneath it.
    ///
    /// Token allocation sleeps and re-reads the clock until the rendered
    /// token sorts after every existing deployment, so two pushes within the
    /// same millisecond can never collide or reorder.
    pub async fn create_deployment(&self) -> Result<DeploymentDatetime> {
        let latest = self.latest_deployment_datetime().await?;
        let mut token = DeploymentDatetime::from_timestamp(Utc::now());
        if let Some(latest) = latest {
            while token <= latest {
                tokio::time::sleep(Duration::from_millis(1)).await;
                token = DeploymentDatetime::from_timestamp(Utc::now());
            }
        }

        let dir = self.deployment_dir(&token);
        for sub in ["repo", "dependencies", "build-dependencies", "metadata"] {
            tokio::fs::create_dir_all(dir.join(sub)).await?;
        }
        tokio::fs::create_dir_all(self.by_id_dir()).await?;

        info!(deployment = %token, "Created deployment directory");
        Ok(token)
    }

    /// All deployments on disk, sorted ascending. The `by-id` directory is
    /// not a deployment.
    pub async fn all_deployments(&self) -> Result<Vec<DeploymentDatetime>> {
        let dir = self.deployments_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == BY_ID_DIR {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                out.push(DeploymentDatetime::new(name.into_owned()));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Newest deployment on disk, if any.
    pub async fn latest_deployment_datetime(&self) -> Result<Option<DeploymentDatetime>> {
        Ok(self.all_deployments().await?.pop())
    }

    /// Deployment the current repo pointer serves from, if any.
    pub async fn current_deployment_datetime(&self) -> Result<Option<DeploymentDatetime>> {
        let link = self.runtime_dir().join(CurrentPointer::Repo.dir_name());
        let target = match tokio::fs::read_link(&link).await {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // Target shape is ../../app-deployments/<timestamp>/repo
        let datetime = target
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| DeploymentDatetime::new(n.to_string_lossy().into_owned()));
        Ok(datetime)
    }

    /// Write one metadata key. Failures are recoverable I/O errors the
    /// caller must compensate for, never swallowed here.
    pub async fn write_metadata(
        &self,
        datetime: &DeploymentDatetime,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let path = self.metadata_path(datetime, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, format!("{value}\n")).await?;
        debug!(deployment = %datetime, key, "Wrote deployment metadata");
        Ok(())
    }

    /// Read one metadata key; a missing file is `None`, not an error.
    pub async fn read_metadata(
        &self,
        datetime: &DeploymentDatetime,
        key: &str,
    ) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.metadata_path(datetime, key)).await {
            Ok(raw) => Ok(Some(raw.trim_end_matches('\n').to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deterministic content id for a deployment: sha256 over the sorted
    /// relative paths and bytes of every file in its repo tree, truncated.
    /// Identical content always yields the identical id, which is what makes
    /// redeploys of the same artifact detectable.
    pub async fn compute_deployment_id(
        &self,
        datetime: &DeploymentDatetime,
    ) -> Result<DeploymentId> {
        let root = self.repo_dir(datetime);
        let mut files = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();

        let mut hasher = Sha256::new();
        for path in &files {
            let rel = path.strip_prefix(&root).unwrap_or(path);
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(tokio::fs::read(path).await?);
        }
        let digest = hex::encode(hasher.finalize());
        Ok(DeploymentId::new(&digest[..ID_LEN]))
    }

    /// Create the durable id -> timestamp link.
    pub async fn link_id(&self, datetime: &DeploymentDatetime, id: &DeploymentId) -> Result<()> {
        let by_id = self.by_id_dir();
        tokio::fs::create_dir_all(&by_id).await?;
        let link = by_id.join(id.as_str());
        let target = Path::new("..").join(datetime.as_str());
        tokio::fs::symlink(target, &link).await?;
        debug!(deployment = %datetime, id = %id, "Linked deployment id");
        Ok(())
    }

    /// Remove an id link; the compensating action when metadata persistence
    /// fails after linking. Removing a link that does not exist is fine.
    pub async fn unlink_id(&self, id: &DeploymentId) -> Result<()> {
        match tokio::fs::remove_file(self.by_id_dir().join(id.as_str())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a deployment id through its link.
    pub async fn datetime_for_id(&self, id: &DeploymentId) -> Result<Option<DeploymentDatetime>> {
        match tokio::fs::read_link(self.by_id_dir().join(id.as_str())).await {
            Ok(target) => Ok(target
                .file_name()
                .map(|n| DeploymentDatetime::new(n.to_string_lossy().into_owned()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Repoint a current pointer at a deployment.
    ///
    /// The link is created under a temporary name and renamed over the old
    /// one, so readers always observe either the old or the new target.
    pub async fn point_current(
        &self,
        pointer: CurrentPointer,
        datetime: &DeploymentDatetime,
    ) -> Result<()> {
        let runtime = self.runtime_dir();
        tokio::fs::create_dir_all(&runtime).await?;

        let target = Path::new("../..")
            .join(DEPLOYMENTS_DIR)
            .join(datetime.as_str())
            .join(pointer.dir_name());
        let link = runtime.join(pointer.dir_name());
        let staging = runtime.join(format!(".{}.new", pointer.dir_name()));

        match tokio::fs::remove_file(&staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::symlink(&target, &staging).await?;
        tokio::fs::rename(&staging, &link).await?;

        debug!(pointer = pointer.dir_name(), deployment = %datetime, "Repointed current symlink");
        Ok(())
    }

    /// Delete a deployment: unlink its id first (no dangling link may ever
    /// exist), then remove the tree.
    pub async fn delete_deployment(&self, datetime: &DeploymentDatetime) -> Result<()> {
        if let Some(id) = self.read_metadata(datetime, "id").await? {
            self.unlink_id(&DeploymentId::new(id)).await?;
        }
        tokio::fs::remove_dir_all(self.deployment_dir(datetime)).await?;
        info!(deployment = %datetime, "Deleted deployment");
        Ok(())
    }
}
