//! The `gear` CLI - the per-gear entry points for the Gantry deployment
//! lifecycle.
//!
//! These are the commands the platform invokes on a gear from its git
//! hooks (`prereceive`, `postreceive`), that sibling gears invoke remotely
//! during fan-out (`activate`, `link-deployment`), and that operators use
//! directly (`deploy`, `rollback`).

use clap::{Parser, Subcommand};
use gantry_orchestrator::runners::{
    FileGearStateStore, GitRepository, ProcessGearRuntime, ProcessShell, ScriptHookRunner,
    ScriptProxyStatusPort, SshRemoteExecutor,
};
use gantry_orchestrator::{Orchestrator, OrchestratorConfig};
use gantry_registry::JsonFileGearRegistry;
use gantry_store::DeploymentStore;
use gantry_types::{DeployOptions, DeploymentDatetime, DeploymentId, Gear};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod error;

pub use error::{CliError, CliResult};

/// Gear descriptor maintained by the platform under the container
const GEAR_DESCRIPTOR: &str = ".gantry/gear.json";

/// Gear registry file maintained by the platform under the container
const GEAR_REGISTRY: &str = ".gantry/gear-registry.json";

/// Per-gear deployment operations
#[derive(Parser)]
#[command(name = "gear")]
#[command(about = "Gantry - per-gear deployment lifecycle operations", long_about = None)]
#[command(version)]
struct Cli {
    /// Gear container directory
    #[arg(short, long, env = "GANTRY_CONTAINER_DIR")]
    container_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Prepare the gear for an inbound push
    Prereceive {
        /// Keep the gear in rotation during the push
        #[arg(long)]
        hot_deploy: bool,
    },

    /// Build, prepare, and activate freshly pushed code
    Postreceive {
        /// Swap code in place without leaving rotation
        #[arg(long)]
        hot_deploy: bool,

        /// Git ref to deploy (defaults to master)
        #[arg(long)]
        r#ref: Option<String>,
    },

    /// Activate a prepared deployment on this gear and its children
    Activate {
        /// Content-derived deployment id
        deployment_id: String,

        /// Swap code in place without leaving rotation
        #[arg(long, conflicts_with = "no_hot_deploy")]
        hot_deploy: bool,

        /// Explicitly drain and re-admit this gear (the default)
        #[arg(long)]
        no_hot_deploy: bool,

        /// First activation after cartridge install
        #[arg(long)]
        init: bool,
    },

    /// Roll back to a previously deployed snapshot
    Rollback {
        /// Target deployment id; defaults to the most recent prior deployment
        deployment_id: Option<String>,
    },

    /// Full deploy: prereceive then postreceive
    Deploy {
        /// Swap code in place without leaving rotation
        #[arg(long)]
        hot_deploy: bool,
    },

    /// Register a received deployment's id link (used during artifact
    /// distribution from the landing gear)
    LinkDeployment {
        deployment_id: String,
        deployment_datetime: String,
    },
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    init_tracing(cli.verbose);

    let container_dir = match cli.container_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Prereceive { hot_deploy } => {
            let orchestrator = build_orchestrator(&container_dir).await?;
            let opts = DeployOptions {
                hot_deploy,
                ..Default::default()
            };
            print!("{}", orchestrator.pre_receive(&opts).await?);
        }
        Commands::Postreceive { hot_deploy, r#ref } => {
            let orchestrator = build_orchestrator(&container_dir).await?;
            let mut opts = DeployOptions {
                hot_deploy,
                git_ref: r#ref,
                ..Default::default()
            };
            print!("{}", orchestrator.post_receive(&mut opts).await?);
        }
        Commands::Activate {
            deployment_id,
            hot_deploy,
            no_hot_deploy: _,
            init,
        } => {
            let orchestrator = build_orchestrator(&container_dir).await?;
            let opts = DeployOptions {
                deployment_id: Some(DeploymentId::new(deployment_id)),
                hot_deploy,
                init,
                ..Default::default()
            };
            let result = orchestrator.activate(&opts).await?;
            if !result.is_success() {
                return Err(gantry_orchestrator::OrchestratorError::ActivationFailed(result).into());
            }
        }
        Commands::Rollback { deployment_id } => {
            let orchestrator = build_orchestrator(&container_dir).await?;
            let opts = DeployOptions {
                deployment_id: deployment_id.map(DeploymentId::new),
                ..Default::default()
            };
            print!("{}", orchestrator.rollback(&opts).await?);
        }
        Commands::Deploy { hot_deploy } => {
            let orchestrator = build_orchestrator(&container_dir).await?;
            let mut opts = DeployOptions {
                hot_deploy,
                ..Default::default()
            };
            print!("{}", orchestrator.deploy(&mut opts).await?);
        }
        Commands::LinkDeployment {
            deployment_id,
            deployment_datetime,
        } => {
            let store = DeploymentStore::new(&container_dir);
            let id = DeploymentId::new(deployment_id);
            let datetime = DeploymentDatetime::new(deployment_datetime);
            store.link_id(&datetime, &id).await?;
            store.write_metadata(&datetime, "id", id.as_str()).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Wire a production orchestrator for the gear living at `container_dir`.
async fn build_orchestrator(container_dir: &Path) -> CliResult<Orchestrator> {
    let gear = load_gear_descriptor(container_dir).await?;

    let hooks = Arc::new(ScriptHookRunner::new(container_dir));
    let runtime = Arc::new(ProcessGearRuntime::new(
        container_dir,
        gear.cartridges.clone(),
    ));
    let repository = Arc::new(GitRepository::new(
        container_dir
            .join("git")
            .join(format!("{}.git", gear.application_name)),
    ));
    let state = Arc::new(FileGearStateStore::new(container_dir));
    let registry = Arc::new(JsonFileGearRegistry::new(container_dir.join(GEAR_REGISTRY)));
    let proxy = Arc::new(ScriptProxyStatusPort::new(
        container_dir,
        gear.cartridges.web_proxy.as_ref(),
    ));
    let remote = Arc::new(SshRemoteExecutor::default());
    let shell = Arc::new(ProcessShell);

    Ok(Orchestrator::new(
        gear,
        OrchestratorConfig::default(),
        hooks,
        runtime,
        repository,
        state,
        registry,
        proxy,
        remote,
        shell,
    ))
}

/// Load the platform-maintained gear descriptor, pinning its container dir
/// to the one this invocation runs against.
async fn load_gear_descriptor(container_dir: &Path) -> CliResult<Gear> {
    let path = container_dir.join(GEAR_DESCRIPTOR);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| CliError::Descriptor(format!("{}: {e}", path.display())))?;
    let mut gear: Gear =
        serde_json::from_str(&raw).map_err(|e| CliError::Descriptor(e.to_string()))?;
    gear.container_dir = container_dir.to_path_buf();
    Ok(gear)
}
