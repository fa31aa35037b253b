//! Gear environment loading
//!
//! A gear's environment is persisted as one file per variable under
//! `<container>/.env`; cartridges keep their own `env/` directories in the
//! same format. Values are the file contents with the trailing newline
//! stripped.

use crate::error::Result;
use gantry_types::GearEnv;
use std::path::Path;

/// Load the environment for a gear from its container directory.
pub async fn load_gear_env(container_dir: &Path) -> Result<GearEnv> {
    load_env_dir(&container_dir.join(".env")).await
}

/// Load a one-file-per-variable environment directory. A missing directory
/// is an empty environment.
pub async fn load_env_dir(dir: &Path) -> Result<GearEnv> {
    let mut env = GearEnv::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(env),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let value = tokio::fs::read_to_string(entry.path()).await?;
        env.insert(name, value.trim_end_matches('\n').to_string());
    }
    Ok(env)
}
