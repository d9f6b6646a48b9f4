//! Scheduling-conflict resolution between periodic-scan operations.

use contracts::{ConflictHook, ConflictView, ConflictWinner, RadioOp};

/// Decide which of two colliding periodic-scan operations keeps the slot.
///
/// First match wins:
/// 1. a context with less than two intervals of supervision left wins,
///    the incumbent when both are that close;
/// 2. a train whose interval is more than `ratio` times the other's wins;
/// 3. the incumbent wins.
pub fn resolve(incumbent: &ConflictView, challenger: &ConflictView, ratio: u32) -> ConflictWinner {
    let starving = |view: &ConflictView| {
        (view.sup_remaining_usec as u64) < 2 * view.interval_usec as u64
    };
    if starving(incumbent) {
        return ConflictWinner::Incumbent;
    }
    if starving(challenger) {
        return ConflictWinner::Challenger;
    }

    let ratio = ratio as u64;
    let (inc, chal) = (
        incumbent.interval_usec as u64,
        challenger.interval_usec as u64,
    );
    if chal > ratio * inc {
        ConflictWinner::Challenger
    } else {
        ConflictWinner::Incumbent
    }
}

/// Hook handed to the radio scheduler.
///
/// Operations without a [`ConflictView`] are extended-scan windows; any
/// periodic-scan operation displaces them.
#[derive(Debug, Clone, Copy)]
pub struct ConflictPolicy {
    ratio: u32,
}

impl ConflictPolicy {
    pub fn new(ratio: u32) -> Self {
        Self { ratio }
    }
}

impl ConflictHook for ConflictPolicy {
    fn resolve(&self, incumbent: &RadioOp, challenger: &RadioOp) -> ConflictWinner {
        let winner = match (&incumbent.priority, &challenger.priority) {
            (Some(inc), Some(chal)) => resolve(inc, chal, self.ratio),
            (None, Some(_)) => ConflictWinner::Challenger,
            _ => ConflictWinner::Incumbent,
        };
        tracing::debug!(
            incumbent = ?incumbent.owner,
            challenger = ?challenger.owner,
            winner = ?winner,
            "Radio conflict resolved"
        );
        observability::record_conflict(match winner {
            ConflictWinner::Incumbent => "incumbent",
            ConflictWinner::Challenger => "challenger",
        });
        winner
    }
}
