//! Per-disk scheduling context.
//!
//! All mutable scheduling state for one disk lives in `DiskState` behind
//! a single mutex. The lock is held for queue and counter manipulation
//! only, never across a call into the disk driver. Everything the
//! background tasks poll without the lock (shutdown, idleness,
//! observability counters) is atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::priority::PRIO_LEVELS;
use crate::queue::SubmitterQueue;
use crate::request::SubmitterId;

/// Lock-protected scheduling state for one disk.
pub(crate) struct DiskState {
    /// Live queues, one per active submitter.
    pub(crate) queues: HashMap<SubmitterId, SubmitterQueue>,
    /// Latency-weighted transaction budget per priority band. Replaced
    /// wholesale each balancer tick, never incrementally updated.
    pub(crate) budget: [u64; PRIO_LEVELS],
    /// Last-measured disk utilization, 0..=100.
    pub(crate) disk_busy_pct: u64,
    /// Idle time accumulated this interval.
    pub(crate) idle_time: Duration,
    /// Start of the currently open idle window, if the disk is idle.
    pub(crate) idle_since: Option<Instant>,
    /// Start of the current measurement interval.
    pub(crate) interval_start: Instant,
    /// Utilization was at or above the full threshold two ticks ago.
    pub(crate) prev_full: bool,
    /// Utilization was at or above the full threshold last tick.
    pub(crate) last_full: bool,
    /// Right-shifts applied while summing weighted products this tick,
    /// undone symmetrically when budgets are redistributed.
    pub(crate) lost_bits: u32,
}

impl DiskState {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            queues: HashMap::new(),
            budget: [0; PRIO_LEVELS],
            disk_busy_pct: 0,
            idle_time: Duration::ZERO,
            idle_since: None,
            interval_start: now,
            prev_full: false,
            last_full: false,
            lost_bits: 0,
        }
    }

    /// Closes an open idle window, folding it into the interval's idle
    /// time accumulator.
    pub(crate) fn close_idle_window(&mut self, now: Instant) {
        if let Some(since) = self.idle_since.take() {
            self.idle_time += now.saturating_duration_since(since);
        }
    }
}

/// Shared per-disk context owned by the scheduler handle and both
/// background tasks.
pub(crate) struct DiskContext {
    /// The per-disk lock.
    pub(crate) state: Mutex<DiskState>,
    /// Cooperative shutdown flag, observed by both tasks at each wake.
    pub(crate) die: AtomicBool,
    /// Last-known disk idleness, set by the idle notification and
    /// cleared when the dispatcher moves work.
    pub(crate) idle: AtomicBool,
    /// Edge-triggered early wake for the dispatcher.
    pub(crate) idle_notify: Notify,
    /// Wakes both tasks so they observe `die` promptly on detach.
    pub(crate) shutdown: Notify,
    /// Submitters throttled by self-throttle since attach.
    pub(crate) limited_submitters: AtomicU64,
    /// Requests accepted by the submission path since attach.
    pub(crate) enqueued_total: AtomicU64,
    /// Requests handed to the driver since attach.
    pub(crate) dispatched_total: AtomicU64,
    /// Completions recorded since attach.
    pub(crate) completed_total: AtomicU64,
    /// Balancer ticks executed since attach.
    pub(crate) balance_ticks: AtomicU64,
}

impl DiskContext {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DiskState::new(Instant::now())),
            die: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            idle_notify: Notify::new(),
            shutdown: Notify::new(),
            limited_submitters: AtomicU64::new(0),
            enqueued_total: AtomicU64::new(0),
            dispatched_total: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            balance_ticks: AtomicU64::new(0),
        }
    }
}
