//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// Configuration for the fair-queue scheduler.
///
/// The numeric defaults are tuning constants carried over from the
/// original scheme; changing them changes observed behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FqConfig {
    /// Period of the dispatcher wake timer.
    pub dispatch_interval: Duration,
    /// Period of the balancer recomputation.
    pub balance_interval: Duration,
    /// Maximum requests moved into the dispatch batch per pass.
    /// Bounds lock-held time and batch allocation.
    pub dispatch_batch: usize,
    /// Extra allowance granted to a saturated, throttled queue while the
    /// disk is idle.
    pub idle_grant: u64,
    /// Disk utilization percentage at or above which the disk counts as
    /// full (throttling may engage, hysteresis latches).
    pub busy_threshold_pct: u64,
    /// Disk utilization percentage below which throttling relaxes.
    pub relax_threshold_pct: u64,
    /// A throttled queue whose used budget times this factor still fits
    /// in its allocation is eligible for unthrottling.
    pub relax_surplus_factor: u64,
}

impl Default for FqConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_millis(60),
            balance_interval: Duration::from_millis(500),
            dispatch_batch: 128,
            idle_grant: 5,
            busy_threshold_pct: 90,
            relax_threshold_pct: 80,
            relax_surplus_factor: 2,
        }
    }
}

impl FqConfig {
    /// Validates the configuration. Called at attach time; a rejected
    /// configuration is fatal to attach.
    pub fn validate(&self) -> SchedResult<()> {
        if self.dispatch_batch == 0 {
            return Err(SchedError::InvalidConfig {
                reason: "dispatch_batch must be nonzero".to_string(),
            });
        }
        if self.dispatch_interval.is_zero() || self.balance_interval.is_zero() {
            return Err(SchedError::InvalidConfig {
                reason: "dispatch_interval and balance_interval must be nonzero".to_string(),
            });
        }
        if self.busy_threshold_pct > 100 {
            return Err(SchedError::InvalidConfig {
                reason: format!(
                    "busy_threshold_pct {} exceeds 100",
                    self.busy_threshold_pct
                ),
            });
        }
        if self.relax_threshold_pct >= self.busy_threshold_pct {
            return Err(SchedError::InvalidConfig {
                reason: format!(
                    "relax_threshold_pct {} must be below busy_threshold_pct {}",
                    self.relax_threshold_pct, self.busy_threshold_pct
                ),
            });
        }
        if self.relax_surplus_factor == 0 {
            return Err(SchedError::InvalidConfig {
                reason: "relax_surplus_factor must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}
