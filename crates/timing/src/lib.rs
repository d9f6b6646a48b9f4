//! # Timing
//!
//! Anchor-point and clock-drift arithmetic for periodic advertising trains.
//!
//! Everything here is a pure function of its inputs: anchor projection,
//! window widening (including the three-clock widening of a transferred
//! sync) and the SyncInfo offset codec.

mod anchor;
mod drift;
mod offset;

pub use anchor::{advance, compute_anchor, event_counter_reached, events_until, Anchor};
pub use drift::{
    compound_drift_for_transfer, offset_is_schedulable, window_widening, Span,
    MIN_SCHEDULE_OFFSET_USEC, TRANSFER_ROUNDING_USEC,
};
pub use offset::{
    OffsetUnits, SyncOffset, OFFSET_ADJUST_USEC, OFFSET_COARSE_THRESHOLD_USEC, OFFSET_MAX_VALUE,
};

use contracts::LinkLayerError;
use thiserror::Error;

/// Periodic advertising interval unit (1.25 ms).
pub const PERIODIC_INTERVAL_UNIT_USEC: u32 = 1_250;

/// Convert an interval in 1.25 ms units to microseconds.
pub fn interval_to_usec(interval: u16) -> u32 {
    interval as u32 * PERIODIC_INTERVAL_UNIT_USEC
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingError {
    #[error("offset {usec}us not representable in SyncInfo")]
    OffsetOutOfRange { usec: u32 },
    #[error("interval must be non-zero")]
    ZeroInterval,
}

impl From<TimingError> for LinkLayerError {
    fn from(err: TimingError) -> Self {
        LinkLayerError::Timing {
            message: err.to_string(),
        }
    }
}
