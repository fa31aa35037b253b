//! Store error types

use thiserror::Error;

/// Errors from the deployment store.
///
/// Lookups that can legitimately come up empty (unknown id, no deployments
/// yet) answer with `Option`, not an error; what remains is filesystem I/O,
/// which callers compensate for where the invariants demand it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deployment store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
