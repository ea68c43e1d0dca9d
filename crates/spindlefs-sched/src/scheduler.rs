//! Scheduler handle: attach, submission surface, detach.
//!
//! `FqScheduler` exclusively owns one disk's scheduling context. Attach
//! spawns the dispatcher and balancer tasks; detach flags shutdown,
//! wakes both tasks and waits for the dispatcher to flush every pending
//! request before the context is released. There is no global registry:
//! the handle is the lifetime.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::balance::balance_loop;
use crate::config::FqConfig;
use crate::context::DiskContext;
use crate::dispatch::dispatch_loop;
use crate::driver::DiskDriver;
use crate::error::{SchedError, SchedResult};
use crate::queue::SubmitterQueue;
use crate::request::{IoRequest, SubmitterId};
use crate::stats::SchedStats;

/// Handle to an attached fair-queue scheduler for one disk.
pub struct FqScheduler {
    ctx: Arc<DiskContext>,
    dispatcher: JoinHandle<()>,
    balancer: JoinHandle<()>,
}

impl FqScheduler {
    /// Attaches the scheduler to a disk: validates the configuration and
    /// spawns the dispatcher and balancer bound to a fresh context with
    /// an empty queue set and a zeroed budget table.
    ///
    /// A rejected configuration is fatal to the attach; the caller
    /// should fall back to unscheduled FIFO dispatch.
    pub fn attach(driver: Arc<dyn DiskDriver>, config: FqConfig) -> SchedResult<Self> {
        config.validate()?;
        let ctx = Arc::new(DiskContext::new());
        let dispatcher = tokio::spawn(dispatch_loop(ctx.clone(), driver.clone(), config.clone()));
        let balancer = tokio::spawn(balance_loop(ctx.clone(), driver, config));
        debug!("fair-queue scheduler attached");
        Ok(Self {
            ctx,
            dispatcher,
            balancer,
        })
    }

    /// Queues a request behind the submitter's earlier requests. The
    /// submitter's queue is created lazily on its first enqueue.
    pub fn enqueue(&self, request: IoRequest) -> SchedResult<()> {
        if self.ctx.die.load(Ordering::Acquire) {
            warn!(%request.submitter, "enqueue refused during detach");
            return Err(SchedError::Detaching);
        }
        {
            let mut state = self.ctx.state.lock();
            state
                .queues
                .entry(request.submitter)
                .or_insert_with(SubmitterQueue::new)
                .push(request);
        }
        self.ctx.enqueued_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Records a completed request's latency against its submitter. The
    /// balancer folds these into the next interval's budgets. A
    /// completion for an already-reclaimed queue is counted but not
    /// attributed.
    pub fn record_completion(&self, submitter: SubmitterId, latency: Duration) {
        {
            let mut state = self.ctx.state.lock();
            if let Some(queue) = state.queues.get_mut(&submitter) {
                let micros = latency.as_micros().min(u64::MAX as u128) as u64;
                queue.record_completion(micros);
            }
        }
        self.ctx.completed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Edge-triggered signal from the driver that the device has no
    /// outstanding work. Opens an idle window for utilization accounting
    /// and wakes the dispatcher early.
    pub fn notify_idle(&self) {
        self.ctx.idle.store(true, Ordering::Release);
        {
            let mut state = self.ctx.state.lock();
            if state.idle_since.is_none() {
                state.idle_since = Some(Instant::now());
            }
        }
        self.ctx.idle_notify.notify_one();
    }

    /// Read-only statistics snapshot.
    pub fn stats(&self) -> SchedStats {
        let (active_queues, disk_busy_pct) = {
            let state = self.ctx.state.lock();
            (state.queues.len() as u64, state.disk_busy_pct)
        };
        SchedStats {
            limited_submitters: self.ctx.limited_submitters.load(Ordering::Relaxed),
            enqueued_total: self.ctx.enqueued_total.load(Ordering::Relaxed),
            dispatched_total: self.ctx.dispatched_total.load(Ordering::Relaxed),
            completed_total: self.ctx.completed_total.load(Ordering::Relaxed),
            balance_ticks: self.ctx.balance_ticks.load(Ordering::Relaxed),
            active_queues,
            disk_busy_pct,
        }
    }

    /// Detaches the scheduler: flags shutdown, wakes both tasks and
    /// waits for them to exit. The dispatcher flushes all pending
    /// requests through the driver before terminating; nothing is
    /// dropped.
    pub async fn detach(self) {
        self.ctx.die.store(true, Ordering::Release);
        self.ctx.shutdown.notify_waiters();
        self.ctx.idle_notify.notify_waiters();
        if let Err(err) = self.dispatcher.await {
            warn!(?err, "dispatcher task ended abnormally");
        }
        if let Err(err) = self.balancer.await {
            warn!(?err, "balancer task ended abnormally");
        }
        debug!("fair-queue scheduler detached");
    }
}
