//! Per-gear operation results and their fan-out aggregates

use crate::ids::GearUuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of an operation against a single gear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failure,
}

impl OperationStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result of one operation against one gear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub gear_uuid: GearUuid,
    pub status: OperationStatus,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
}

impl OperationResult {
    pub fn success(gear_uuid: GearUuid) -> Self {
        Self {
            gear_uuid,
            status: OperationStatus::Success,
            messages: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failure(gear_uuid: GearUuid) -> Self {
        Self {
            gear_uuid,
            status: OperationStatus::Failure,
            messages: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Aggregate of per-gear results for a fan-out operation.
///
/// The overall status is a pure OR over member failures and is only computed
/// once every member has completed; callers inspect `gear_results` for
/// per-gear diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub status: OperationStatus,
    pub gear_results: BTreeMap<GearUuid, OperationResult>,
}

impl AggregateResult {
    /// The genuine no-op: zero targets, zero results, success.
    pub fn empty_success() -> Self {
        Self {
            status: OperationStatus::Success,
            gear_results: BTreeMap::new(),
        }
    }

    /// Aggregate completed member results, keyed by each gear's own uuid.
    pub fn from_results(results: impl IntoIterator<Item = OperationResult>) -> Self {
        let gear_results: BTreeMap<GearUuid, OperationResult> = results
            .into_iter()
            .map(|r| (r.gear_uuid.clone(), r))
            .collect();
        let status = if gear_results.values().any(|r| !r.is_success()) {
            OperationStatus::Failure
        } else {
            OperationStatus::Success
        };
        Self {
            status,
            gear_results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// How many member gears failed.
    pub fn failed_count(&self) -> usize {
        self.gear_results
            .values()
            .filter(|r| !r.is_success())
            .count()
    }
}
