//! Gear identity and execution state

use crate::cartridge::CartridgeSet;
use crate::ids::GearUuid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A single execution unit hosting one application's cartridge set.
///
/// Mutated only by the orchestrator; a layer above this core guarantees at
/// most one concurrent orchestration run per gear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gear {
    pub uuid: GearUuid,
    pub application_name: String,
    pub namespace: String,
    /// Owning container directory; all deployment state lives underneath it
    pub container_dir: PathBuf,
    pub cartridges: CartridgeSet,
}

/// Gear execution state as recorded in the external gear-state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GearState {
    Stopped,
    Started,
    Building,
    Deploying,
}

impl fmt::Display for GearState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Started => write!(f, "started"),
            Self::Building => write!(f, "building"),
            Self::Deploying => write!(f, "deploying"),
        }
    }
}

/// Registry role a child gear can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GearRole {
    Web,
    Proxy,
}

impl fmt::Display for GearRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Web => write!(f, "web"),
            Self::Proxy => write!(f, "proxy"),
        }
    }
}
