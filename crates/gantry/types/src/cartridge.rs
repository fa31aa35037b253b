//! Cartridge model
//!
//! A cartridge is an installable runtime component hosted on a gear. The
//! orchestrator only cares about three roles: the primary cartridge (the
//! application runtime), an optional builder cartridge (which takes over the
//! whole receive flow when present), and an optional web proxy cartridge
//! (whose presence marks the application as scaled).

use serde::{Deserialize, Serialize};

/// An installed cartridge as the orchestrator sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cartridge {
    /// Cartridge name, e.g. `ruby-1.9`
    pub name: String,
    /// Directory under the gear's container dir holding the cartridge
    pub directory: String,
    /// Software version reported to `post-install`
    pub software_version: String,
    /// Whether this cartridge is a web proxy (proxy gears never host
    /// application code)
    pub web_proxy: bool,
    /// Whether installation requires an initial build
    pub install_build_required: bool,
    /// Whether the cartridge participates in the build lifecycle at all
    pub buildable: bool,
}

impl Cartridge {
    pub fn is_web_proxy(&self) -> bool {
        self.web_proxy
    }
}

/// The cartridge set configured on a single gear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeSet {
    pub primary: Cartridge,
    pub builder: Option<Cartridge>,
    pub web_proxy: Option<Cartridge>,
}

impl CartridgeSet {
    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    pub fn has_web_proxy(&self) -> bool {
        self.web_proxy.is_some()
    }

    /// Look up an installed cartridge by name across all three slots.
    pub fn get(&self, name: &str) -> Option<&Cartridge> {
        [Some(&self.primary), self.builder.as_ref(), self.web_proxy.as_ref()]
            .into_iter()
            .flatten()
            .find(|c| c.name == name)
    }

    /// Resolve the per-run decision record: collaborator presence is probed
    /// once and branched on as a finite table, never re-queried mid-run.
    pub fn capabilities(&self, hot_deploy: bool) -> Capabilities {
        Capabilities {
            has_builder: self.has_builder(),
            has_web_proxy: self.has_web_proxy(),
            hot_deploy,
        }
    }
}

/// Decision record resolved once per orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_builder: bool,
    pub has_web_proxy: bool,
    pub hot_deploy: bool,
}
