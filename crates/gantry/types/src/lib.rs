//! Core model types for the Gantry deployment orchestrator.
//!
//! Everything here is plain data: identifiers, the cartridge/gear model,
//! per-gear operation results and their aggregates, deployment options, and
//! the countdown budget used to bound sequential external commands. The
//! orchestration logic itself lives in `gantry-orchestrator`.

pub mod cartridge;
pub mod countdown;
pub mod env;
pub mod gear;
pub mod ids;
pub mod options;
pub mod result;

pub use cartridge::{Capabilities, Cartridge, CartridgeSet};
pub use countdown::Countdown;
pub use env::GearEnv;
pub use gear::{Gear, GearRole, GearState};
pub use ids::{AddressParseError, DeploymentDatetime, DeploymentId, GearAddress, GearUuid};
pub use options::DeployOptions;
pub use result::{AggregateResult, OperationResult, OperationStatus};

/// Metadata value marking a deployment that has been activated at least once.
pub const DEPLOYED: &str = "DEPLOYED";

/// Sentinel clone URL meaning "no git source"; suppresses the initial build
/// and git metadata recording during `post_configure`.
pub const NO_CLONE_SENTINEL: &str = "empty";
