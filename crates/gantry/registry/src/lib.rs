//! Topology contracts for the deployment orchestrator.
//!
//! The gear registry is the platform's map of an application's gears per
//! role; it is read-only to this core and only consulted to compute fan-out
//! target lists. The proxy status port toggles a gear's membership in the
//! load-balancing tier during activation drains.

pub mod error;
pub mod proxy;
pub mod registry;

pub use error::{RegistryError, Result};
pub use proxy::{InMemoryProxyStatusPort, ProxyAction, ProxyStatusPort};
pub use registry::{GearRegistry, InMemoryGearRegistry, JsonFileGearRegistry, RegistryEntry};
