//! Collaborator contract: the physical disk driver.
//!
//! The scheduler never talks to hardware. It hands ready requests to a
//! [`DiskDriver`] outside the context lock and resolves submitter
//! priorities through it. Completion latency is reported back through
//! the scheduler's own completion path, not via a dispatch return value.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::priority::Priority;
use crate::request::{IoRequest, SubmitterId};

/// Interface to the physical disk driver.
#[async_trait]
pub trait DiskDriver: Send + Sync + 'static {
    /// Hands a request to the device. May block on driver-side queueing;
    /// the scheduler never holds its lock across this call. Errors are
    /// reported out-of-band through the request's completion path.
    async fn dispatch(&self, request: IoRequest);

    /// Resolves the current priority band for a submitter. Bands can
    /// change over a submitter's lifetime, so callers re-read this on
    /// every pass rather than caching it.
    fn priority_of(&self, submitter: SubmitterId) -> Priority;
}

/// In-memory driver for tests: records every dispatched request and
/// serves priorities from a settable table.
#[derive(Default)]
pub struct MockDiskDriver {
    dispatched: Mutex<Vec<IoRequest>>,
    priorities: Mutex<HashMap<SubmitterId, Priority>>,
}

impl MockDiskDriver {
    /// Creates an empty mock driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a priority band to a submitter.
    pub fn set_priority(&self, submitter: SubmitterId, priority: Priority) {
        self.priorities.lock().insert(submitter, priority);
    }

    /// Returns a copy of every request dispatched so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<IoRequest> {
        self.dispatched.lock().clone()
    }

    /// Returns the number of requests dispatched so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().len()
    }
}

#[async_trait]
impl DiskDriver for MockDiskDriver {
    async fn dispatch(&self, request: IoRequest) {
        self.dispatched.lock().push(request);
    }

    fn priority_of(&self, submitter: SubmitterId) -> Priority {
        self.priorities
            .lock()
            .get(&submitter)
            .copied()
            .unwrap_or_default()
    }
}
