//! Per-submitter FIFO queue with interval accounting.
//!
//! One `SubmitterQueue` exists per active submitter per disk. It holds
//! the submitter's pending requests in arrival order plus the counters
//! the balancer snapshots each tick. The queue stores no priority band;
//! that is re-read from the driver on every use.

use std::collections::VecDeque;

use crate::request::IoRequest;

/// Consecutive fully-idle balancer intervals after which a queue is
/// reclaimed. A submitter that comes back simply gets a fresh queue on
/// its next enqueue.
pub(crate) const QUEUE_REAP_INTERVALS: u8 = 2;

/// Per-submitter queue state. All fields are protected by the owning
/// disk context's lock.
#[derive(Debug, Default)]
pub(crate) struct SubmitterQueue {
    /// Pending requests, arrival order = dispatch order.
    pending: VecDeque<IoRequest>,
    /// Requests dispatched since the last balancer tick.
    pub(crate) issued: u64,
    /// Completions recorded since the last balancer tick.
    pub(crate) transactions: u64,
    /// Running mean completion latency (microseconds) since the last tick.
    pub(crate) avg_latency_us: u64,
    /// Snapshot of `transactions` taken at tick time.
    pub(crate) interval_transactions: u64,
    /// Snapshot of `avg_latency_us` taken at tick time.
    pub(crate) interval_avg_latency_us: u64,
    /// Live rate cap for this queue; 0 means unthrottled.
    pub(crate) max_throughput: u64,
    /// Set by the balancer each tick, cleared by whoever applies the
    /// self-throttle re-evaluation.
    pub(crate) needs_rebalance: bool,
    /// Consecutive balancer intervals with no pending work, no issues
    /// and no completions.
    pub(crate) idle_intervals: u8,
}

impl SubmitterQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a request. The queue is live again for reclamation purposes.
    pub(crate) fn push(&mut self, request: IoRequest) {
        self.pending.push_back(request);
        self.idle_intervals = 0;
    }

    /// Folds one completion into the running interval mean.
    pub(crate) fn record_completion(&mut self, latency_us: u64) {
        let total =
            self.avg_latency_us as u128 * self.transactions as u128 + latency_us as u128;
        self.avg_latency_us = (total / (self.transactions as u128 + 1)) as u64;
        self.transactions += 1;
        self.idle_intervals = 0;
    }

    /// Captures the interval statistics the self-throttle path reads
    /// between ticks.
    pub(crate) fn snapshot_interval(&mut self) {
        self.interval_transactions = self.transactions;
        self.interval_avg_latency_us = self.avg_latency_us;
    }

    /// Resets the running counters for the next interval and flags the
    /// queue for one opportunistic self-throttle re-evaluation.
    pub(crate) fn reset_interval(&mut self) {
        self.transactions = 0;
        self.avg_latency_us = 0;
        self.issued = 0;
        self.needs_rebalance = true;
    }

    /// Moves up to `limit` requests into `out`, oldest first, counting
    /// them as issued. Returns the number moved.
    pub(crate) fn take_batch(&mut self, limit: usize, out: &mut Vec<IoRequest>) -> usize {
        let mut moved = 0;
        while moved < limit {
            match self.pending.pop_front() {
                Some(request) => {
                    out.push(request);
                    moved += 1;
                }
                None => break,
            }
        }
        self.issued += moved as u64;
        moved
    }

    #[inline]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
