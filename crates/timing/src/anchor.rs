//! Anchor projection.

use contracts::{tick_diff, Tick};

use crate::TimingError;

/// A confirmed (or predicted) train occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anchor {
    pub tick: Tick,
    pub event_counter: u16,
}

impl Anchor {
    pub fn new(tick: Tick, event_counter: u16) -> Self {
        Self {
            tick,
            event_counter,
        }
    }
}

/// Project `last` to the first occurrence at or after `reference`.
///
/// Handles a reference on either side of `last`; the event counter moves by
/// the same number of intervals, modulo 2^16.
pub fn compute_anchor(
    reference: Tick,
    interval_usec: u32,
    last: Anchor,
) -> Result<Anchor, TimingError> {
    if interval_usec == 0 {
        return Err(TimingError::ZeroInterval);
    }
    let interval = interval_usec as u64;
    let diff = tick_diff(reference, last.tick) as i64;

    let anchor = if diff > 0 {
        let events = (diff as u64).div_ceil(interval);
        Anchor {
            tick: last.tick.wrapping_add((events * interval) as u32),
            event_counter: last.event_counter.wrapping_add(events as u16),
        }
    } else {
        let events = diff.unsigned_abs() / interval;
        Anchor {
            tick: last.tick.wrapping_sub((events * interval) as u32),
            event_counter: last.event_counter.wrapping_sub(events as u16),
        }
    };
    Ok(anchor)
}

/// Move `anchor` forward by `events` intervals.
pub fn advance(anchor: Anchor, events: u16, interval_usec: u32) -> Anchor {
    let span = (events as u64 * interval_usec as u64) as u32;
    Anchor {
        tick: anchor.tick.wrapping_add(span),
        event_counter: anchor.event_counter.wrapping_add(events),
    }
}

/// Whether `current` is at or past `instant` in 16-bit counter space.
pub fn event_counter_reached(current: u16, instant: u16) -> bool {
    (current.wrapping_sub(instant) as i16) >= 0
}

/// Signed number of events from `from` to `to`.
pub fn events_until(from: u16, to: u16) -> i16 {
    to.wrapping_sub(from) as i16
}
