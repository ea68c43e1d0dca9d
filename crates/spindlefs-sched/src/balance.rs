//! Global budget recomputation.
//!
//! The balancer runs once per `balance_interval`. Each tick it measures
//! disk utilization from the interval's idle-time accounting, sums every
//! active queue's latency-weighted demand, and redistributes the total
//! across priority bands proportionally to a biased weight. The sum is
//! kept overflow-safe by a running right-shift (`lost_bits`), undone
//! symmetrically when the budget table is rebuilt.
//!
//! The weighting counts *which* bands have demand, not how much: a band
//! with one busy submitter and a band with ten both count once. The
//! magnitude of demand enters through the measured total, not the
//! weights.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::FqConfig;
use crate::context::{DiskContext, DiskState};
use crate::driver::DiskDriver;
use crate::priority::{Priority, PRIO_BIAS, PRIO_LEVELS};
use crate::queue::QUEUE_REAP_INTERVALS;
use crate::request::SubmitterId;

/// Adds `product` into a running sum scaled down by `lost_bits`
/// right-shifts, widening the shift whenever the sum would overflow.
/// Returns the new `(sum, lost_bits)` pair. Each extra shift halves both
/// the incoming product and everything already accumulated, so the sum
/// stays proportional.
pub fn accumulate_scaled(total: u64, lost_bits: u32, product: u128) -> (u64, u32) {
    let mut total = total;
    let mut lost_bits = lost_bits;
    loop {
        let shifted = if lost_bits >= u128::BITS {
            0
        } else {
            product >> lost_bits
        };
        if shifted <= u64::MAX as u128 {
            if let Some(sum) = total.checked_add(shifted as u64) {
                return (sum, lost_bits);
            }
        }
        lost_bits += 1;
        total >>= 1;
    }
}

/// Rebuilds the budget table from a scaled total: every band with demand
/// receives `weight * total / weight_sum`, shifted back up by
/// `lost_bits`. Bands without demand keep their previous budget.
pub fn redistribute_budget(
    budget: &mut [u64; PRIO_LEVELS],
    demand: &[u64; PRIO_LEVELS],
    total_budget: u64,
    lost_bits: u32,
) {
    let mut weight_sum: u128 = 0;
    for (band, count) in demand.iter().enumerate() {
        if *count > 0 {
            weight_sum += (PRIO_BIAS + band as u64) as u128 * *count as u128;
        }
    }
    let weight_sum = weight_sum.max(1);

    for (band, count) in demand.iter().enumerate() {
        if *count > 0 {
            let share = (PRIO_BIAS + band as u64) as u128 * total_budget as u128 / weight_sum;
            budget[band] = restore_scale(share, lost_bits);
        }
    }
}

/// Undoes the accumulation shift on a redistributed share, saturating
/// instead of wrapping.
fn restore_scale(share: u128, lost_bits: u32) -> u64 {
    if share == 0 {
        return 0;
    }
    if lost_bits >= u128::BITS || share > u128::MAX >> lost_bits {
        return u64::MAX;
    }
    u64::try_from(share << lost_bits).unwrap_or(u64::MAX)
}

/// One balancer tick over the locked disk state.
///
/// Priorities are resolved through `priority_of` so callers re-read the
/// submitter's current band on every tick.
pub(crate) fn balance_tick<F>(
    state: &mut DiskState,
    now: Instant,
    config: &FqConfig,
    mut priority_of: F,
) where
    F: FnMut(SubmitterId) -> Priority,
{
    // Interval wall-clock time; a zero or negative interval degenerates
    // to one microsecond so the busy division is defined.
    let elapsed_us = now
        .saturating_duration_since(state.interval_start)
        .as_micros()
        .max(1);

    let disk_was_idle = state.idle_since.is_some();
    state.close_idle_window(now);
    let idle_us = state.idle_time.as_micros().min(elapsed_us);
    state.disk_busy_pct = (100 * (elapsed_us - idle_us) / elapsed_us) as u64;
    state.idle_time = Duration::ZERO;
    state.interval_start = now;
    if disk_was_idle {
        // The disk is still idle; reopen the window for the next interval.
        state.idle_since = Some(now);
    }

    state.lost_bits = 0;
    let mut total_budget: u64 = 0;
    let mut demand = [0u64; PRIO_LEVELS];

    for (submitter, queue) in state.queues.iter_mut() {
        let quiet =
            queue.transactions == 0 && queue.issued == 0 && queue.pending_len() == 0;
        if queue.transactions > 0 {
            queue.snapshot_interval();
            let product = queue.interval_avg_latency_us as u128
                * queue.interval_transactions as u128;
            let (sum, bits) = accumulate_scaled(total_budget, state.lost_bits, product);
            total_budget = sum;
            state.lost_bits = bits;
            demand[priority_of(*submitter).as_index()] += 1;
        } else {
            // An idle submitter is never left throttled by a stale cap.
            queue.max_throughput = 0;
        }
        if quiet {
            queue.idle_intervals = queue.idle_intervals.saturating_add(1);
        } else {
            queue.idle_intervals = 0;
        }
        queue.reset_interval();
    }

    // With no active demand the previous table stands.
    if demand.iter().any(|count| *count > 0) {
        redistribute_budget(&mut state.budget, &demand, total_budget, state.lost_bits);
        debug!(
            total_budget,
            lost_bits = state.lost_bits,
            busy_pct = state.disk_busy_pct,
            "budget table recomputed"
        );
    }

    state.prev_full = state.last_full;
    state.last_full = state.disk_busy_pct >= config.busy_threshold_pct;

    state.queues.retain(|submitter, queue| {
        if queue.idle_intervals >= QUEUE_REAP_INTERVALS {
            debug!(%submitter, "reclaiming idle submitter queue");
            false
        } else {
            true
        }
    });
}

/// Balancer task body. Terminates as soon as shutdown is observed; the
/// dispatcher owns the drain.
pub(crate) async fn balance_loop(
    ctx: Arc<DiskContext>,
    driver: Arc<dyn DiskDriver>,
    config: FqConfig,
) {
    let mut ticker = tokio::time::interval(config.balance_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval() fires immediately; swallow that so the first
    // measurement covers a real interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.shutdown.notified() => {}
        }
        if ctx.die.load(Ordering::Acquire) {
            debug!("balancer exiting");
            return;
        }
        {
            let mut state = ctx.state.lock();
            balance_tick(&mut state, Instant::now(), &config, |submitter| {
                driver.priority_of(submitter)
            });
        }
        ctx.balance_ticks.fetch_add(1, Ordering::Relaxed);
    }
}
