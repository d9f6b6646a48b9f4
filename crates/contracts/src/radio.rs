//! Radio scheduler and baseband collaborator contracts.
//!
//! The scheduler owns the radio timeline. The sync engine hands it timed
//! operations and learns about their outcome through [`crate::Platform`]
//! messages posted back to the engine's dispatch entry point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Phy, SyncHandle};

/// Radio time in microseconds; wraps at 2^32.
pub type Tick = u32;

/// Signed distance from `from` to `to`, valid while the two are within 2^31 us.
pub fn tick_diff(to: Tick, from: Tick) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Scheduler-assigned identifier of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(pub usize);

/// Which engine object a radio operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpOwner {
    ExtScan(Phy),
    PeriodicScan(SyncHandle),
}

/// Fields the conflict resolver compares for one periodic-scan operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConflictView {
    /// Supervision budget left at the operation's start
    pub sup_remaining_usec: u32,
    /// Train interval
    pub interval_usec: u32,
}

/// A timed radio operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioOp {
    pub owner: OpOwner,
    /// Start of the receive window
    pub due: Tick,
    /// Minimum time the operation must own the radio
    pub duration_usec: u32,
    pub channel: u8,
    pub phy: Phy,
    pub access_address: u32,
    pub crc_init: u32,
    /// Present for periodic-scan operations, absent for scan windows
    pub priority: Option<ConflictView>,
}

impl RadioOp {
    pub fn end(&self) -> Tick {
        self.due.wrapping_add(self.duration_usec)
    }

    /// Whether the two operations' windows intersect.
    pub fn overlaps(&self, other: &RadioOp) -> bool {
        tick_diff(self.due, other.end()) < 0 && tick_diff(other.due, self.end()) < 0
    }
}

/// Which of two colliding operations keeps the contended slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictWinner {
    Incumbent,
    Challenger,
}

impl ConflictWinner {
    pub fn flipped(self) -> Self {
        match self {
            Self::Incumbent => Self::Challenger,
            Self::Challenger => Self::Incumbent,
        }
    }
}

/// Conflict-resolution hook the scheduler calls when two operations overlap.
pub trait ConflictHook {
    fn resolve(&self, incumbent: &RadioOp, challenger: &RadioOp) -> ConflictWinner;
}

/// Successful insertion result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Inserted without displacing anything
    Inserted(OpId),
    /// Inserted after the hook preferred it over the listed incumbents,
    /// which were unscheduled and receive no end notification
    Preempted { id: OpId, displaced: Vec<OpOwner> },
}

impl ScheduleOutcome {
    pub fn id(&self) -> OpId {
        match self {
            Self::Inserted(id) | Self::Preempted { id, .. } => *id,
        }
    }
}

/// Scheduling failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("slot held by {with:?}")]
    Conflict { with: OpOwner },
    #[error("no radio time available")]
    NoTime,
    #[error("due tick {due} already passed at {now}")]
    TooLate { due: Tick, now: Tick },
}

/// External radio scheduler.
///
/// Every operation that leaves the queue through [`RadioScheduler::remove`]
/// or by running to completion produces exactly one end notification.
pub trait RadioScheduler {
    fn now(&self) -> Tick;

    /// Insert at a fixed time, consulting `hook` on overlap.
    fn schedule_at(
        &mut self,
        op: RadioOp,
        hook: &dyn ConflictHook,
    ) -> Result<ScheduleOutcome, ScheduleError>;

    /// Insert at the first free slot at or after `op.due`.
    fn schedule_next_available(&mut self, op: RadioOp) -> Result<OpId, ScheduleError>;

    /// Request removal; returns `false` when `id` is not queued.
    fn remove(&mut self, id: OpId) -> bool;
}

/// Baseband protocol modes the engine switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolMode {
    ExtScan,
    PeriodicScan,
}

/// External baseband driver.
pub trait Baseband {
    fn start(&mut self, mode: ProtocolMode);
    fn stop(&mut self, mode: ProtocolMode);
}
