//! Proxy status port: load-balancer membership toggling

use async_trait::async_trait;
use dashmap::DashMap;
use gantry_types::{GearUuid, OperationResult};

/// Membership change requested of the proxy tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAction {
    Enable,
    Disable,
}

/// Port into the frontend proxy configuration system.
///
/// Failures come back as a per-gear [`OperationResult`], never as an error:
/// the activation coordinator folds them into its aggregate.
#[async_trait]
pub trait ProxyStatusPort: Send + Sync {
    /// Toggle a gear's membership. `persist` controls whether the change
    /// survives a proxy restart; activation drains are always transient
    /// (`persist: false`).
    async fn update(&self, action: ProxyAction, gear: &GearUuid, persist: bool)
        -> OperationResult;
}

/// In-memory proxy status port for tests and development.
///
/// Tracks membership and every call made; individual gears can be primed to
/// fail on enable or disable.
#[derive(Default)]
pub struct InMemoryProxyStatusPort {
    enabled: DashMap<GearUuid, bool>,
    fail_disable: DashMap<GearUuid, ()>,
    fail_enable: DashMap<GearUuid, ()>,
    calls: std::sync::Mutex<Vec<(ProxyAction, GearUuid, bool)>>,
}

impl InMemoryProxyStatusPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_disable_for(&self, gear: GearUuid) {
        self.fail_disable.insert(gear, ());
    }

    pub fn fail_enable_for(&self, gear: GearUuid) {
        self.fail_enable.insert(gear, ());
    }

    pub fn is_enabled(&self, gear: &GearUuid) -> bool {
        self.enabled.get(gear).map(|e| *e).unwrap_or(false)
    }

    /// Every call made, in order.
    pub fn calls(&self) -> Vec<(ProxyAction, GearUuid, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyStatusPort for InMemoryProxyStatusPort {
    async fn update(
        &self,
        action: ProxyAction,
        gear: &GearUuid,
        persist: bool,
    ) -> OperationResult {
        self.calls
            .lock()
            .unwrap()
            .push((action, gear.clone(), persist));

        let primed_failure = match action {
            ProxyAction::Disable => self.fail_disable.contains_key(gear),
            ProxyAction::Enable => self.fail_enable.contains_key(gear),
        };
        if primed_failure {
            return OperationResult::failure(gear.clone()).with_error("proxy update failed");
        }

        self.enabled
            .insert(gear.clone(), matches!(action, ProxyAction::Enable));
        OperationResult::success(gear.clone())
    }
}
