//! Error types for the disk scheduler.

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Error variants for scheduler operations.
#[derive(Debug, Error)]
pub enum SchedError {
    /// The scheduler configuration failed validation at attach time.
    /// The caller should fall back to unscheduled FIFO dispatch.
    #[error("Invalid scheduler configuration: {reason}")]
    InvalidConfig {
        /// Description of the rejected setting.
        reason: String,
    },

    /// The scheduler is detaching; new submissions are refused.
    #[error("Scheduler is detaching, submission refused")]
    Detaching,
}
