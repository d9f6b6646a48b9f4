//! Host event records built by the sync engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{AddrType, BdAddr, HciStatus, Phy, Sca, SyncHandle};

/// Fragment status of an advertising report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    #[default]
    Complete,
    /// More fragments follow
    Incomplete,
    /// Reassembly stopped; data is cut short
    Truncated,
}

/// Payload of the periodic sync established event.
///
/// A failed or cancelled establishment carries a zeroed payload apart from
/// its status, or the best-known partial values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncEstablishedReport {
    pub status: HciStatus,
    pub handle: SyncHandle,
    pub sid: u8,
    pub addr: BdAddr,
    pub addr_type: AddrType,
    pub phy: Option<Phy>,
    /// Periodic interval in 1.25 ms units
    pub interval: u16,
    pub advertiser_sca: Sca,
}

impl SyncEstablishedReport {
    /// Report with every field zero except `status`.
    pub fn zeroed(status: HciStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// Payload of the periodic sync transfer received event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncTransferReport {
    pub status: HciStatus,
    pub conn_handle: u16,
    /// Opaque value chosen by the peer's host
    pub service_data: u16,
    pub handle: SyncHandle,
    pub sid: u8,
    pub addr: BdAddr,
    pub addr_type: AddrType,
    pub phy: Option<Phy>,
    pub interval: u16,
    pub advertiser_sca: Sca,
}

/// Discriminated record handed to [`crate::HostNotifier::deliver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostEvent {
    /// Sync established (or failed) after a direct scan
    SyncEstablished(SyncEstablishedReport),
    /// Sync established (or failed) from a peer's sync transfer
    SyncTransferReceived(SyncTransferReport),
    /// An established sync stopped receiving before its supervision timeout
    SyncLost { handle: SyncHandle },
    PeriodicAdvReport {
        handle: SyncHandle,
        tx_power: i8,
        rssi: i8,
        data_status: DataStatus,
        data: Bytes,
    },
    ExtAdvReport {
        phy: Phy,
        addr: BdAddr,
        addr_type: AddrType,
        sid: Option<u8>,
        rssi: i8,
        /// Interval in 1.25 ms units when the advertisement carries SyncInfo
        periodic_interval: Option<u16>,
        data_status: DataStatus,
        data: Bytes,
    },
    /// Extended scan duration elapsed with no period configured
    ScanTimeout,
}

impl HostEvent {
    /// Status of an establishment outcome, `None` for other events.
    pub fn establish_status(&self) -> Option<HciStatus> {
        match self {
            Self::SyncEstablished(report) => Some(report.status),
            Self::SyncTransferReceived(report) => Some(report.status),
            _ => None,
        }
    }
}
