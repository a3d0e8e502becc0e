//! Runtime configuration for the Mapping controller
//!
//! Built by `main` from CLI flags and environment variables, then carried in
//! the controller [`Context`](crate::controller::Context).

use std::time::Duration;

use crate::DEFAULT_FIELD_MANAGER;

/// Default delay before re-checking a reconciled Mapping
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Default requeue delay after a failed reconcile
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Default requeue delay after an optimistic-concurrency conflict
pub const DEFAULT_CONFLICT_BACKOFF: Duration = Duration::from_secs(1);

/// Controller settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Field manager recorded on status patches
    pub field_manager: String,
    /// Requeue interval after a successful reconcile
    pub resync_interval: Duration,
    /// Requeue interval after a failed reconcile
    pub error_backoff: Duration,
    /// Requeue interval after a conflict
    pub conflict_backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            conflict_backoff: DEFAULT_CONFLICT_BACKOFF,
        }
    }
}

impl ControllerConfig {
    /// Requeue delay for a failed reconcile
    pub fn backoff_for(&self, error: &crate::Error) -> Duration {
        if error.is_conflict() {
            self.conflict_backoff
        } else {
            self.error_backoff
        }
    }
}
