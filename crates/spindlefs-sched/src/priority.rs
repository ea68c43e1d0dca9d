//! Submitter priority classes ("ionice" bands).
//!
//! A submitter carries an integer priority band in `0..=10`. Budget
//! allocation weights each band by `PRIO_BIAS + band`, so higher bands
//! receive proportionally larger shares without ever zeroing out the
//! lowest band.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of distinct priority bands.
pub const PRIO_LEVELS: usize = 11;

/// Additive weighting bias applied to every band.
///
/// Tuning constant carried over unchanged; do not alter without flagging
/// a behavior change.
pub const PRIO_BIAS: u64 = 5;

/// A submitter's priority band. Higher values receive larger budget shares.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Priority(u8);

impl Priority {
    /// The lowest priority band.
    pub const MIN: Priority = Priority(0);
    /// The highest priority band.
    pub const MAX: Priority = Priority((PRIO_LEVELS - 1) as u8);

    /// Creates a priority, clamping out-of-range bands to `MAX`.
    pub fn new(band: u8) -> Self {
        Priority(band.min(Self::MAX.0))
    }

    /// Returns the raw band value.
    #[inline]
    pub fn band(&self) -> u8 {
        self.0
    }

    /// Returns the index for budget-table access.
    #[inline]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }

    /// Returns the allocation weight for this band.
    #[inline]
    pub fn weight(&self) -> u64 {
        PRIO_BIAS + self.0 as u64
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
