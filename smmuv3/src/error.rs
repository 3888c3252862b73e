//! Error types for the SMMUv3 driver

use core::fmt;

/// Errors surfaced by bring-up, the queue protocol, and the mapping API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "SMMU errors must be handled"]
pub enum SmmuError {
    /// Caller handed in an unusable argument (zero-length range, zero base
    /// address, empty StreamID span).
    InvalidParameter,
    /// The platform allocator could not satisfy a queue or table
    /// allocation.
    OutOfResources,
    /// A bounded polling budget was exhausted: the hardware did not
    /// acknowledge, drain, or make space in time.
    Timeout,
    /// The global error register was non-zero at a checkpoint. Fatal
    /// misconfiguration, never retried.
    HardwareFault,
}

impl fmt::Display for SmmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::OutOfResources => write!(f, "out of resources"),
            Self::Timeout => write!(f, "timeout waiting on hardware"),
            Self::HardwareFault => write!(f, "global error reported by hardware"),
        }
    }
}
