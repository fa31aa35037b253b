//! Gear registry: per-role topology of an application's gears

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use gantry_types::{GearRole, GearUuid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One registry entry: how a gear is reached from its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Externally reachable host for remote command execution
    pub proxy_hostname: String,
}

/// Read-only view of the platform's gear topology.
///
/// The registry is maintained by the platform outside this core; the
/// orchestrator only reads it to compute remote target lists.
#[async_trait]
pub trait GearRegistry: Send + Sync {
    /// All entries of the given role, keyed by gear uuid. The local gear
    /// appears in its own roles; callers exclude it themselves.
    async fn entries(&self, role: GearRole) -> Result<BTreeMap<GearUuid, RegistryEntry>>;
}

/// Registry backed by the JSON file the platform keeps under the container
/// directory.
pub struct JsonFileGearRegistry {
    path: PathBuf,
}

/// On-disk shape: `{"web": {"<uuid>": {"proxy_hostname": ...}}, "proxy": {...}}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    web: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    proxy: BTreeMap<String, RegistryEntry>,
}

impl JsonFileGearRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl GearRegistry for JsonFileGearRegistry {
    async fn entries(&self, role: GearRole) -> Result<BTreeMap<GearUuid, RegistryEntry>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let file: RegistryFile = serde_json::from_str(&raw)?;
        let entries = match role {
            GearRole::Web => file.web,
            GearRole::Proxy => file.proxy,
        };
        Ok(entries
            .into_iter()
            .map(|(uuid, entry)| (GearUuid::new(uuid), entry))
            .collect())
    }
}

/// In-memory registry for tests and development
#[derive(Default)]
pub struct InMemoryGearRegistry {
    entries: DashMap<GearRole, BTreeMap<GearUuid, RegistryEntry>>,
}

impl InMemoryGearRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, role: GearRole, uuid: GearUuid, host: impl Into<String>) {
        self.entries.entry(role).or_default().insert(
            uuid,
            RegistryEntry {
                proxy_hostname: host.into(),
            },
        );
    }
}

#[async_trait]
impl GearRegistry for InMemoryGearRegistry {
    async fn entries(&self, role: GearRole) -> Result<BTreeMap<GearUuid, RegistryEntry>> {
        Ok(self
            .entries
            .get(&role)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_file_registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gear-registry.json");
        tokio::fs::write(
            &path,
            r#"{"web":{"5503":{"proxy_hostname":"localhost"},"5504":{"proxy_hostname":"localhost"}},
               "proxy":{"5505":{"proxy_hostname":"node2"}}}"#,
        )
        .await
        .unwrap();

        let registry = JsonFileGearRegistry::new(&path);
        let web = registry.entries(GearRole::Web).await.unwrap();
        assert_eq!(web.len(), 2);
        let proxy = registry.entries(GearRole::Proxy).await.unwrap();
        assert_eq!(proxy[&GearUuid::new("5505")].proxy_hostname, "node2");
    }

    #[tokio::test]
    async fn test_missing_registry_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonFileGearRegistry::new(dir.path().join("absent.json"));
        assert!(registry.entries(GearRole::Web).await.unwrap().is_empty());
    }
}
