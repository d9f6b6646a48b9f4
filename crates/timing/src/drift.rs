//! Window widening.
//!
//! Every source of clock uncertainty is expressed as a one-sided widening in
//! microseconds: the receiver opens its window that much early and keeps it
//! open that much longer.

/// Minimum lead between "now" and a committed radio operation (T_IFS).
pub const MIN_SCHEDULE_OFFSET_USEC: u32 = 150;

/// Fixed rounding term added to a transferred sync's compound widening.
pub const TRANSFER_ROUNDING_USEC: u32 = 2;

/// Elapsed span measured as a count of equal intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub events: u32,
    pub interval_usec: u32,
}

impl Span {
    pub fn new(events: u32, interval_usec: u32) -> Self {
        Self {
            events,
            interval_usec,
        }
    }

    pub fn usec(self) -> u32 {
        let total = self.events as u64 * self.interval_usec as u64;
        total.min(u32::MAX as u64) as u32
    }
}

/// `ceil(elapsed * ppm / 1e6)`, saturating at `u32::MAX`.
pub fn window_widening(elapsed_usec: u32, accuracy_ppm: u32) -> u32 {
    let widened = (elapsed_usec as u64 * accuracy_ppm as u64).div_ceil(1_000_000);
    widened.min(u32::MAX as u64) as u32
}

/// Widening for a sync learned through a relay.
///
/// The relay's view of the train (relay and advertiser clocks over `train`)
/// and its view of the connection (relay and local clocks over `conn`) drift
/// independently; their sum is widened once more by all three clocks.
pub fn compound_drift_for_transfer(
    train: Span,
    conn: Span,
    local_ppm: u16,
    peer_ppm: u16,
    relay_ppm: u16,
) -> u32 {
    let (local, peer, relay) = (local_ppm as u32, peer_ppm as u32, relay_ppm as u32);

    let train_drift = window_widening(train.usec(), relay + peer);
    let conn_drift = window_widening(conn.usec(), relay + local);
    let partial = train_drift.saturating_add(conn_drift);

    partial
        .saturating_add(window_widening(partial, local + peer + relay))
        .saturating_add(TRANSFER_ROUNDING_USEC)
}

/// Whether an operation `offset_usec` ahead of now may still be committed.
pub fn offset_is_schedulable(offset_usec: i64) -> bool {
    offset_usec >= MIN_SCHEDULE_OFFSET_USEC as i64
}
