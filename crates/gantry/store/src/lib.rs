//! On-disk deployment state for a single gear.
//!
//! The store owns everything under `<container>/app-deployments`: immutable
//! per-deployment snapshot directories keyed by a strictly increasing
//! timestamp token, a `by-id` directory of content-id links, and the
//! current-pointer symlinks under `<container>/app-root/runtime` that build
//! and activation repoint. Retention decides how many past deployments
//! survive; everything else is purged once superseded.

pub mod deployments;
pub mod env;
pub mod error;
pub mod retention;

pub use deployments::{CurrentPointer, DeploymentStore};
pub use env::{load_env_dir, load_gear_env};
pub use error::{Result, StoreError};
pub use retention::{clean_up_deployments_before, RetentionPolicy};
