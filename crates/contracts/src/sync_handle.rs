//! Sync handle type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host-visible handle of an established periodic sync.
///
/// The value is the slot index of the sync's context in the pool, so it is
/// stable for the lifetime of the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncHandle(pub u16);

impl SyncHandle {
    pub fn from_index(index: usize) -> Self {
        Self(index as u16)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
