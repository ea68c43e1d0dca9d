//! Request and submitter identity types.
//!
//! The scheduler treats a request as an opaque unit of work: it tracks
//! identity and the owning submitter, never the payload. The driver
//! correlates dispatched requests with device work by `IoRequestId`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for an I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoRequestId(pub u64);

/// Identifier for an I/O submitter (a thread or process issuing disk I/O).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmitterId(pub u64);

impl fmt::Display for SubmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submitter-{}", self.0)
    }
}

/// Type of I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoOpType {
    /// Read from the device.
    Read,
    /// Write to the device.
    Write,
    /// Flush volatile device caches.
    Flush,
    /// Discard (trim) a region.
    Discard,
}

/// A pending I/O request as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct IoRequest {
    /// Unique request identifier.
    pub id: IoRequestId,
    /// The submitter this request belongs to.
    pub submitter: SubmitterId,
    /// Type of I/O operation, for accounting and logging only.
    pub op: IoOpType,
}

impl IoRequest {
    /// Creates a new request.
    pub fn new(id: IoRequestId, submitter: SubmitterId, op: IoOpType) -> Self {
        Self { id, submitter, op }
    }
}
