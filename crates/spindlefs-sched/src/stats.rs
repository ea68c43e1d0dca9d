//! Read-only observability snapshot.

use serde::{Deserialize, Serialize};

/// Point-in-time scheduler statistics. Pure snapshot, no mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedStats {
    /// Submitters throttled by self-throttle since attach.
    pub limited_submitters: u64,
    /// Requests accepted by the submission path since attach.
    pub enqueued_total: u64,
    /// Requests handed to the driver since attach.
    pub dispatched_total: u64,
    /// Completions recorded since attach.
    pub completed_total: u64,
    /// Balancer ticks executed since attach.
    pub balance_ticks: u64,
    /// Live per-submitter queues.
    pub active_queues: u64,
    /// Last-measured disk utilization, 0..=100.
    pub disk_busy_pct: u64,
}
