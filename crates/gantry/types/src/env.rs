//! Gear environment variable names
//!
//! A gear's environment is a plain string map loaded from its container
//! directory (see `gantry-store`); these are the variables the orchestrator
//! itself reads or overrides.

use std::collections::BTreeMap;

/// Environment passed to hooks and remote commands
pub type GearEnv = BTreeMap<String, String>;

/// Application-level DNS name; differs from [`GEAR_DNS`] on non-elected
/// members of a scaled tier.
pub const APP_DNS: &str = "GANTRY_APP_DNS";

/// This gear's own DNS name.
pub const GEAR_DNS: &str = "GANTRY_GEAR_DNS";

/// Path of the repo directory hooks should operate on; overridden per
/// deployment during build and prepare.
pub const REPO_DIR: &str = "GANTRY_REPO_DIR";

/// Suffix of the per-cartridge ident variable carrying `vendor:name:version:cart-version`.
pub const IDENT_SUFFIX: &str = "_IDENT";
