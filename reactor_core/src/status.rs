//! Status summary published every cycle.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    /// Store failures have persisted past the configured threshold.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub health: Health,
    pub active_experiment: Option<String>,
    pub storage_connected: bool,
}

impl StatusReport {
    /// Build from the store failure streak.
    pub fn new(active_experiment: Option<String>, store_failures: u32, degraded_after: u32) -> Self {
        let health = if degraded_after > 0 && store_failures >= degraded_after {
            Health::Degraded
        } else {
            Health::Ok
        };
        Self {
            health,
            active_experiment,
            storage_connected: store_failures == 0,
        }
    }
}
