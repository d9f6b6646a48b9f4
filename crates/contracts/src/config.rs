//! Link-layer configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Largest skip accepted from the host.
pub const MAX_SYNC_SKIP: u16 = 0x01F3;
/// Sync timeout bounds in 10 ms units.
pub const MIN_SYNC_TIMEOUT_10MS: u16 = 0x000A;
pub const MAX_SYNC_TIMEOUT_10MS: u16 = 0x4000;

/// Link-layer sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LinkLayerConfig {
    /// Periodic sync context pool capacity
    #[validate(range(min = 1, max = 32))]
    pub max_periodic_syncs: usize,

    /// Local sleep clock accuracy (ppm)
    #[validate(range(min = 1, max = 500))]
    pub local_clock_accuracy_ppm: u16,

    /// Interval ratio above which the less frequent train wins a conflict
    #[validate(range(min = 2, max = 64))]
    pub conflict_interval_ratio: u32,

    /// Lead time the scheduler needs to commit a new operation (us)
    #[validate(range(min = 150, max = 100_000))]
    pub schedule_setup_usec: u32,

    /// Periodic advertiser list capacity
    #[validate(range(min = 1, max = 64))]
    pub periodic_adv_list_size: usize,

    /// Consecutive missed events before a new sync is declared failed
    #[validate(range(min = 1, max = 64))]
    pub establish_event_limit: u16,

    /// Default sync transfer parameters for new connections
    #[validate(nested)]
    pub past_defaults: PastParams,

    /// Extended scan timing per PHY
    #[validate(nested)]
    pub ext_scan: ScanPhyParams,
}

impl Default for LinkLayerConfig {
    fn default() -> Self {
        Self {
            max_periodic_syncs: 4,
            local_clock_accuracy_ppm: 50,
            conflict_interval_ratio: 4,
            schedule_setup_usec: 500,
            periodic_adv_list_size: 8,
            establish_event_limit: 6,
            past_defaults: PastParams::default(),
            ext_scan: ScanPhyParams::default(),
        }
    }
}

/// What the controller does with an incoming `LL_PERIODIC_SYNC_IND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTransferMode {
    /// Ignore transfers
    #[default]
    Off,
    /// Synchronize, report establishment only
    ReportsDisabled,
    /// Synchronize and report every periodic advertisement
    ReportsEnabled,
}

/// Periodic advertising sync transfer (PAST) receive parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PastParams {
    pub mode: SyncTransferMode,

    /// Periodic events that may be skipped after a successful reception
    #[validate(range(max = 0x01F3))]
    pub skip: u16,

    /// Supervision timeout in 10 ms units
    #[validate(range(min = 0x000A, max = 0x4000))]
    pub sync_timeout_10ms: u16,
}

impl Default for PastParams {
    fn default() -> Self {
        Self {
            mode: SyncTransferMode::Off,
            skip: 0,
            sync_timeout_10ms: 1000,
        }
    }
}

/// Extended scan parameters for one PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScanPhyParams {
    /// Send scan requests
    pub active: bool,

    /// Time between the starts of consecutive scan windows (us)
    #[validate(range(min = 2_500, max = 40_959_375))]
    pub interval_usec: u32,

    /// Scan window length (us)
    #[validate(range(min = 2_500, max = 40_959_375))]
    pub window_usec: u32,
}

impl Default for ScanPhyParams {
    fn default() -> Self {
        Self {
            active: false,
            interval_usec: 100_000,
            window_usec: 50_000,
        }
    }
}
