//! Single-shot timer collaborator.

use serde::{Deserialize, Serialize};

use crate::{Phy, SyncHandle};

/// Tag redelivered to the engine when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerId {
    /// No reception on this sync within its supervision timeout
    Supervision(SyncHandle),
    /// Extended scan duration elapsed
    ScanDuration(Phy),
    /// Extended scan period elapsed
    ScanPeriod(Phy),
}

/// Timer service; arming an armed timer restarts it.
pub trait TimerService {
    fn arm(&mut self, id: TimerId, timeout_usec: u32);
    fn disarm(&mut self, id: TimerId);
}
