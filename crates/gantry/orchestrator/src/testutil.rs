//! Shared test rig: an orchestrator wired entirely from recording doubles
//! over a temporary container directory.

use crate::doubles::{
    InMemoryStateStore, MockHooks, MockRemoteExecutor, MockRepository, MockRuntime, MockShell,
};
use crate::lifecycle::{Orchestrator, OrchestratorConfig};
use gantry_registry::{InMemoryGearRegistry, InMemoryProxyStatusPort};
use gantry_store::RetentionPolicy;
use gantry_types::{
    Cartridge, CartridgeSet, DeploymentDatetime, DeploymentId, Gear, GearAddress, GearUuid,
    DEPLOYED,
};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn cartridge(name: &str, web_proxy: bool) -> Cartridge {
    Cartridge {
        name: name.to_string(),
        directory: name.to_string(),
        software_version: "0.1".to_string(),
        web_proxy,
        install_build_required: false,
        buildable: !web_proxy,
    }
}

pub(crate) struct RigConfig {
    pub scaled: bool,
    pub builder: bool,
    pub install_build_required: bool,
    pub keep_deployments: usize,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            scaled: false,
            builder: false,
            install_build_required: false,
            keep_deployments: 1,
        }
    }
}

pub(crate) struct TestRig {
    pub dir: tempfile::TempDir,
    pub hooks: Arc<MockHooks>,
    pub runtime: Arc<MockRuntime>,
    pub repository: Arc<MockRepository>,
    pub state: Arc<InMemoryStateStore>,
    pub registry: Arc<InMemoryGearRegistry>,
    pub proxy: Arc<InMemoryProxyStatusPort>,
    pub remote: Arc<MockRemoteExecutor>,
    pub shell: Arc<MockShell>,
    pub orchestrator: Orchestrator,
}

impl TestRig {
    pub async fn new() -> Self {
        Self::build(RigConfig::default()).await
    }

    pub async fn scaled() -> Self {
        Self::build(RigConfig {
            scaled: true,
            ..Default::default()
        })
        .await
    }

    pub async fn build(cfg: RigConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut primary = cartridge("mock-0.1", false);
        primary.install_build_required = cfg.install_build_required;
        let cartridges = CartridgeSet {
            primary,
            builder: cfg.builder.then(|| cartridge("builder-1.0", false)),
            web_proxy: cfg.scaled.then(|| cartridge("webproxy-1.4", true)),
        };
        let gear = Gear {
            uuid: GearUuid::new("5503"),
            application_name: "deploytest".to_string(),
            namespace: "ns1".to_string(),
            container_dir: dir.path().to_path_buf(),
            cartridges,
        };

        let hooks = Arc::new(MockHooks::new());
        let runtime = Arc::new(MockRuntime::new());
        let repository = Arc::new(MockRepository::new());
        let state = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(InMemoryGearRegistry::new());
        let proxy = Arc::new(InMemoryProxyStatusPort::new());
        let remote = Arc::new(MockRemoteExecutor::new());
        let shell = Arc::new(MockShell::new());

        let config = OrchestratorConfig {
            retention: RetentionPolicy::new(cfg.keep_deployments),
            initial_build_budget: Duration::from_secs(60),
        };
        let orchestrator = Orchestrator::new(
            gear,
            config,
            hooks.clone(),
            runtime.clone(),
            repository.clone(),
            state.clone(),
            registry.clone(),
            proxy.clone(),
            remote.clone(),
            shell.clone(),
        );

        Self {
            dir,
            hooks,
            runtime,
            repository,
            state,
            registry,
            proxy,
            remote,
            shell,
            orchestrator,
        }
    }

    /// Write one gear environment variable into the container's `.env`.
    pub async fn write_env(&self, key: &str, value: &str) {
        let env_dir = self.dir.path().join(".env");
        tokio::fs::create_dir_all(&env_dir).await.unwrap();
        tokio::fs::write(env_dir.join(key), value).await.unwrap();
    }

    pub fn address(uuid: &str) -> GearAddress {
        GearAddress::new(GearUuid::new(uuid), "localhost")
    }

    /// A deployment with content, a linked id, and `state=DEPLOYED`, with the
    /// current repo pointer aimed at it - the shape `activate` treats as
    /// already active locally.
    pub async fn seeded_active_deployment(&self, id: &str) -> DeploymentDatetime {
        let store = self.orchestrator.store();
        let datetime = store.create_deployment().await.unwrap();
        tokio::fs::write(store.repo_dir(&datetime).join("index.html"), "hi")
            .await
            .unwrap();
        let id = DeploymentId::new(id);
        store.link_id(&datetime, &id).await.unwrap();
        store.write_metadata(&datetime, "id", id.as_str()).await.unwrap();
        store.write_metadata(&datetime, "state", DEPLOYED).await.unwrap();
        store
            .point_current(gantry_store::CurrentPointer::Repo, &datetime)
            .await
            .unwrap();
        datetime
    }
}
