//! Dispatcher: drains submitter queues into the disk driver.
//!
//! The dispatcher wakes on a periodic timer or an explicit idle
//! notification. Under the context lock it applies pending self-throttle
//! re-evaluations, grants idle allowances, and moves a bounded batch of
//! ready requests out of the queues; the driver hand-off happens after
//! the lock is released, so scheduling never blocks on device I/O and
//! the lock is never held across a call that might sleep.
//!
//! On shutdown the dispatcher flushes every remaining request through
//! the driver before exiting. Nothing is dropped on detach.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::FqConfig;
use crate::context::{DiskContext, DiskState};
use crate::driver::DiskDriver;
use crate::priority::Priority;
use crate::request::{IoRequest, SubmitterId};
use crate::throttle::{self, ThrottleDecision};

/// One collection pass over all queues, lock held by the caller.
///
/// Applies the per-interval self-throttle re-evaluation where flagged,
/// grants the idle allowance to saturated throttled queues, and moves
/// ready requests into `batch` bounded per queue by its remaining quota
/// and overall by the configured batch capacity.
pub(crate) fn collect_batch<F>(
    ctx: &DiskContext,
    state: &mut DiskState,
    idle: bool,
    config: &FqConfig,
    mut priority_of: F,
    batch: &mut Vec<IoRequest>,
) where
    F: FnMut(SubmitterId) -> Priority,
{
    let DiskState {
        queues,
        budget,
        disk_busy_pct,
        prev_full,
        last_full,
        ..
    } = state;

    for (submitter, queue) in queues.iter_mut() {
        if queue.pending_len() == 0 {
            continue;
        }

        if queue.needs_rebalance {
            queue.needs_rebalance = false;
            let band = priority_of(*submitter);
            match throttle::apply(
                queue,
                budget[band.as_index()],
                *disk_busy_pct,
                *prev_full,
                *last_full,
                config,
            ) {
                ThrottleDecision::Throttle(cap) => {
                    ctx.limited_submitters.fetch_add(1, Ordering::Relaxed);
                    debug!(%submitter, band = %band, cap, "submitter throttled");
                }
                ThrottleDecision::Unthrottle => {
                    trace!(%submitter, "submitter unthrottled");
                }
                ThrottleDecision::Unchanged => {}
            }
        }

        // A saturated queue gets a little more headroom while the disk
        // has nothing better to do, rather than starving until the next
        // balancer tick.
        if queue.max_throughput > 0 && idle && queue.issued >= queue.max_throughput {
            queue.max_throughput += config.idle_grant;
        }

        let room = config.dispatch_batch.saturating_sub(batch.len());
        if room == 0 {
            continue;
        }
        let allowed = if queue.max_throughput == 0 {
            room
        } else {
            queue
                .max_throughput
                .saturating_sub(queue.issued)
                .min(room as u64) as usize
        };
        queue.take_batch(allowed, batch);
    }
}

/// Dispatcher task body.
pub(crate) async fn dispatch_loop(
    ctx: Arc<DiskContext>,
    driver: Arc<dyn DiskDriver>,
    config: FqConfig,
) {
    let mut ticker = tokio::time::interval(config.dispatch_interval);
    let mut batch: Vec<IoRequest> = Vec::with_capacity(config.dispatch_batch);

    loop {
        let idle_wake = tokio::select! {
            _ = ticker.tick() => false,
            _ = ctx.idle_notify.notified() => true,
            _ = ctx.shutdown.notified() => false,
        };
        if ctx.die.load(Ordering::Acquire) {
            break;
        }
        let idle = idle_wake || ctx.idle.load(Ordering::Acquire);

        batch.clear();
        {
            let mut state = ctx.state.lock();
            collect_batch(&ctx, &mut state, idle, &config, |s| driver.priority_of(s), &mut batch);
            if !batch.is_empty() {
                // Work is moving; the disk is no longer idle.
                state.close_idle_window(Instant::now());
                ctx.idle.store(false, Ordering::Release);
            }
        }

        ctx.dispatched_total
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        for request in batch.drain(..) {
            driver.dispatch(request).await;
        }
    }

    drain_all(&ctx, driver.as_ref(), &config, &mut batch).await;
    debug!("dispatcher drained and exiting");
}

/// Flushes every remaining request in every queue through the driver.
/// Rate caps do not apply during teardown; only the batch capacity
/// bounds each pass.
async fn drain_all(
    ctx: &DiskContext,
    driver: &dyn DiskDriver,
    config: &FqConfig,
    batch: &mut Vec<IoRequest>,
) {
    loop {
        batch.clear();
        {
            let mut state = ctx.state.lock();
            for queue in state.queues.values_mut() {
                let room = config.dispatch_batch.saturating_sub(batch.len());
                if room == 0 {
                    break;
                }
                queue.take_batch(room, batch);
            }
        }
        if batch.is_empty() {
            return;
        }
        ctx.dispatched_total
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        for request in batch.drain(..) {
            driver.dispatch(request).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDiskDriver;
    use crate::queue::SubmitterQueue;
    use crate::request::{IoOpType, IoRequestId};
    use std::time::Duration;

    fn make_request(id: u64, submitter: u64) -> IoRequest {
        IoRequest::new(IoRequestId(id), SubmitterId(submitter), IoOpType::Read)
    }

    fn queue_with_pending(submitter: u64, count: u64) -> SubmitterQueue {
        let mut q = SubmitterQueue::new();
        for i in 0..count {
            q.push(make_request(submitter * 1000 + i, submitter));
        }
        q
    }

    fn lowest_band(_submitter: SubmitterId) -> Priority {
        Priority::MIN
    }

    #[test]
    fn test_unthrottled_queue_drains_to_batch_cap() {
        let ctx = DiskContext::new();
        let config = FqConfig {
            dispatch_batch: 4,
            ..Default::default()
        };
        let mut state = ctx.state.lock();
        state.queues.insert(SubmitterId(1), queue_with_pending(1, 10));

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, false, &config, lowest_band, &mut batch);

        assert_eq!(batch.len(), 4);
        assert_eq!(state.queues[&SubmitterId(1)].pending_len(), 6);
        assert_eq!(state.queues[&SubmitterId(1)].issued, 4);
    }

    #[test]
    fn test_throttled_queue_respects_remaining_quota() {
        let ctx = DiskContext::new();
        let config = FqConfig::default();
        let mut state = ctx.state.lock();
        let mut q = queue_with_pending(1, 10);
        q.max_throughput = 5;
        q.issued = 3;
        state.queues.insert(SubmitterId(1), q);

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, false, &config, lowest_band, &mut batch);

        assert_eq!(batch.len(), 2);
        assert_eq!(state.queues[&SubmitterId(1)].issued, 5);
    }

    #[test]
    fn test_saturated_queue_takes_nothing_when_not_idle() {
        let ctx = DiskContext::new();
        let config = FqConfig::default();
        let mut state = ctx.state.lock();
        let mut q = queue_with_pending(1, 10);
        q.max_throughput = 3;
        q.issued = 3;
        state.queues.insert(SubmitterId(1), q);

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, false, &config, lowest_band, &mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_idle_grant_extends_saturated_queue() {
        let ctx = DiskContext::new();
        let config = FqConfig::default();
        let mut state = ctx.state.lock();
        let mut q = queue_with_pending(1, 10);
        q.max_throughput = 3;
        q.issued = 3;
        state.queues.insert(SubmitterId(1), q);

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, true, &config, lowest_band, &mut batch);

        // Grant of 5 on top of the exhausted cap of 3.
        assert_eq!(batch.len(), 5);
        let q = &state.queues[&SubmitterId(1)];
        assert_eq!(q.max_throughput, 8);
        assert_eq!(q.issued, 8);
    }

    #[test]
    fn test_rebalance_flag_applied_once_and_cleared() {
        let ctx = DiskContext::new();
        let config = FqConfig::default();
        let mut state = ctx.state.lock();
        state.disk_busy_pct = 95;
        state.budget = [5_000; crate::priority::PRIO_LEVELS];

        let mut q = queue_with_pending(1, 10);
        q.needs_rebalance = true;
        q.interval_avg_latency_us = 1_000;
        q.interval_transactions = 20;
        state.queues.insert(SubmitterId(1), q);

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, false, &config, lowest_band, &mut batch);

        let q = &state.queues[&SubmitterId(1)];
        assert!(!q.needs_rebalance);
        assert_eq!(q.max_throughput, 5);
        assert_eq!(batch.len(), 5);
        assert_eq!(ctx.limited_submitters.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_batch_capacity_bounds_whole_pass() {
        let ctx = DiskContext::new();
        let config = FqConfig {
            dispatch_batch: 16,
            ..Default::default()
        };
        let mut state = ctx.state.lock();
        state.queues.insert(SubmitterId(1), queue_with_pending(1, 100));
        state.queues.insert(SubmitterId(2), queue_with_pending(2, 100));

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, false, &config, lowest_band, &mut batch);
        assert_eq!(batch.len(), 16);
    }

    #[test]
    fn test_fifo_preserved_within_queue() {
        let ctx = DiskContext::new();
        let config = FqConfig::default();
        let mut state = ctx.state.lock();
        state.queues.insert(SubmitterId(1), queue_with_pending(1, 5));

        let mut batch = Vec::new();
        collect_batch(&ctx, &mut state, false, &config, lowest_band, &mut batch);

        let ids: Vec<u64> = batch
            .iter()
            .filter(|r| r.submitter == SubmitterId(1))
            .map(|r| r.id.0)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_dispatches_on_timer() {
        let ctx = Arc::new(DiskContext::new());
        let driver = Arc::new(MockDiskDriver::new());
        let dyn_driver: Arc<dyn DiskDriver> = driver.clone();
        let config = FqConfig::default();

        let handle = tokio::spawn(dispatch_loop(ctx.clone(), dyn_driver, config.clone()));

        {
            let mut state = ctx.state.lock();
            state.queues.insert(SubmitterId(1), queue_with_pending(1, 3));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.dispatch_count(), 3);

        ctx.die.store(true, Ordering::Release);
        ctx.shutdown.notify_waiters();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_die_drains_everything() {
        let ctx = Arc::new(DiskContext::new());
        let driver = Arc::new(MockDiskDriver::new());
        let dyn_driver: Arc<dyn DiskDriver> = driver.clone();
        // Long timer so the drain, not the periodic pass, moves the work.
        let config = FqConfig {
            dispatch_interval: Duration::from_secs(3600),
            dispatch_batch: 2,
            ..Default::default()
        };

        let handle = tokio::spawn(dispatch_loop(ctx.clone(), dyn_driver, config.clone()));
        // Let the task run its immediate first pass and park.
        tokio::time::sleep(Duration::from_millis(1)).await;

        {
            let mut state = ctx.state.lock();
            let mut q = queue_with_pending(1, 7);
            // Caps are ignored during teardown.
            q.max_throughput = 1;
            q.issued = 1;
            state.queues.insert(SubmitterId(1), q);
        }
        ctx.die.store(true, Ordering::Release);
        ctx.shutdown.notify_waiters();
        handle.await.unwrap();

        assert_eq!(driver.dispatch_count(), 7);
    }
}
