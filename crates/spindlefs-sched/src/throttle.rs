//! Per-queue self-throttling.
//!
//! The fast path of the rebalance scheme: a pure re-evaluation of one
//! queue's rate cap against the budget table the balancer last
//! published. It runs opportunistically from the dispatcher (once per
//! interval per queue, driven by the rebalance flag) so individual
//! submitters react between balancer ticks.
//!
//! Decision shape, against the queue's interval snapshot:
//!   - over budget while the disk is full: cap the queue at the number
//!     of transactions its band's budget buys at its current latency;
//!   - well under budget, or the disk has spare capacity, and no recent
//!     full episode (two-tick hysteresis): unthrottle;
//!   - otherwise: leave the cap alone (dead band).

use crate::config::FqConfig;
use crate::queue::SubmitterQueue;

/// Inputs to one self-throttle evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleInput {
    /// Mean completion latency (microseconds) over the last interval.
    pub interval_avg_latency_us: u64,
    /// Completions over the last interval.
    pub interval_transactions: u64,
    /// Published budget for the submitter's priority band.
    pub budget: u64,
    /// Last-measured disk utilization, 0..=100.
    pub disk_busy_pct: u64,
    /// Utilization was full two ticks ago.
    pub prev_full: bool,
    /// Utilization was full last tick.
    pub last_full: bool,
}

/// Outcome of one self-throttle evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Cap the queue at this many requests per interval.
    Throttle(u64),
    /// Remove the queue's cap.
    Unthrottle,
    /// Dead band: keep the current cap.
    Unchanged,
}

/// Evaluates the self-throttle rule for one queue.
///
/// Zero interval latency never throttles: a queue with no measurable
/// latency cost has used no budget worth capping, and the cap division
/// would be undefined.
pub fn evaluate(input: &ThrottleInput, config: &FqConfig) -> ThrottleDecision {
    let used = input.interval_avg_latency_us as u128 * input.interval_transactions as u128;
    let budget = input.budget as u128;

    if input.interval_avg_latency_us > 0
        && used > budget
        && input.disk_busy_pct >= config.busy_threshold_pct
    {
        return ThrottleDecision::Throttle(input.budget / input.interval_avg_latency_us);
    }

    let surplus = used * (config.relax_surplus_factor as u128) < budget;
    let spare = input.disk_busy_pct < config.relax_threshold_pct;
    if (surplus || spare) && !(input.prev_full || input.last_full) {
        return ThrottleDecision::Unthrottle;
    }

    ThrottleDecision::Unchanged
}

/// Applies the evaluation to a queue, mutating its cap. Caller holds the
/// disk context lock and accounts for `Throttle` outcomes.
pub(crate) fn apply(
    queue: &mut SubmitterQueue,
    budget: u64,
    disk_busy_pct: u64,
    prev_full: bool,
    last_full: bool,
    config: &FqConfig,
) -> ThrottleDecision {
    let decision = evaluate(
        &ThrottleInput {
            interval_avg_latency_us: queue.interval_avg_latency_us,
            interval_transactions: queue.interval_transactions,
            budget,
            disk_busy_pct,
            prev_full,
            last_full,
        },
        config,
    );
    match decision {
        ThrottleDecision::Throttle(cap) => queue.max_throughput = cap,
        ThrottleDecision::Unthrottle => queue.max_throughput = 0,
        ThrottleDecision::Unchanged => {}
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(avg_us: u64, tx: u64, budget: u64, busy: u64) -> ThrottleInput {
        ThrottleInput {
            interval_avg_latency_us: avg_us,
            interval_transactions: tx,
            budget,
            disk_busy_pct: busy,
            prev_full: false,
            last_full: false,
        }
    }

    #[test]
    fn test_over_budget_on_full_disk_throttles() {
        let config = FqConfig::default();
        // used = 1000 * 20 = 20000, budget 5000, busy 95
        let decision = evaluate(&input(1000, 20, 5000, 95), &config);
        assert_eq!(decision, ThrottleDecision::Throttle(5));
    }

    #[test]
    fn test_cap_never_exceeds_budget_at_current_latency() {
        let config = FqConfig::default();
        for budget in [0u64, 1, 999, 5000, 123_456] {
            for avg in [1u64, 7, 1000, 99_999] {
                if let ThrottleDecision::Throttle(cap) =
                    evaluate(&input(avg, u64::MAX / avg, budget, 100), &config)
                {
                    assert!(cap as u128 * avg as u128 <= budget as u128);
                }
            }
        }
    }

    #[test]
    fn test_zero_latency_never_throttles() {
        let config = FqConfig::default();
        let decision = evaluate(&input(0, 1_000_000, 0, 100), &config);
        assert_ne!(
            std::mem::discriminant(&decision),
            std::mem::discriminant(&ThrottleDecision::Throttle(0))
        );
    }

    #[test]
    fn test_over_budget_on_quiet_disk_does_not_throttle() {
        let config = FqConfig::default();
        // Over budget but busy below the full threshold: unthrottle wins
        // (spare capacity, no recent full episode).
        let decision = evaluate(&input(1000, 20, 5000, 50), &config);
        assert_eq!(decision, ThrottleDecision::Unthrottle);
    }

    #[test]
    fn test_surplus_unthrottles() {
        let config = FqConfig::default();
        // used = 1000, budget 5000: used * 2 < budget, disk busy but not full
        let decision = evaluate(&input(100, 10, 5000, 85), &config);
        assert_eq!(decision, ThrottleDecision::Unthrottle);
    }

    #[test]
    fn test_recent_full_blocks_unthrottle() {
        let config = FqConfig::default();
        let mut under = input(100, 10, 5000, 50);
        under.last_full = true;
        assert_eq!(evaluate(&under, &config), ThrottleDecision::Unchanged);

        under.last_full = false;
        under.prev_full = true;
        assert_eq!(evaluate(&under, &config), ThrottleDecision::Unchanged);

        under.prev_full = false;
        assert_eq!(evaluate(&under, &config), ThrottleDecision::Unthrottle);
    }

    #[test]
    fn test_dead_band_leaves_cap_alone() {
        let config = FqConfig::default();
        // used = 3000, budget 5000: not over budget, not under half,
        // busy 85 sits between both thresholds.
        let decision = evaluate(&input(300, 10, 5000, 85), &config);
        assert_eq!(decision, ThrottleDecision::Unchanged);
    }

    #[test]
    fn test_apply_mutates_cap() {
        let config = FqConfig::default();
        let mut q = SubmitterQueue::new();
        q.interval_avg_latency_us = 1000;
        q.interval_transactions = 20;

        let decision = apply(&mut q, 5000, 95, false, false, &config);
        assert_eq!(decision, ThrottleDecision::Throttle(5));
        assert_eq!(q.max_throughput, 5);

        // Next interval the queue went quiet and the disk calmed down.
        q.interval_transactions = 0;
        q.interval_avg_latency_us = 0;
        let decision = apply(&mut q, 5000, 10, false, false, &config);
        assert_eq!(decision, ThrottleDecision::Unthrottle);
        assert_eq!(q.max_throughput, 0);
    }
}
