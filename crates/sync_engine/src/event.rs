//! Messages delivered to [`crate::LinkLayer::dispatch`].

use bytes::Bytes;
use contracts::{OpOwner, Phy, SyncHandle, Tick, TimerId};

/// A packet handed up by the baseband, including its 2-byte PDU header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    pub pdu: Bytes,
    pub rssi: i8,
    /// Start of the packet on air
    pub start: Tick,
}

/// Completion callbacks of scheduled radio operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Extended scan window received an advertising PDU
    AdvReceived { phy: Phy, rx: RxPacket },
    /// Periodic-scan operation received its packet; ends the operation
    PeriodicRx { handle: SyncHandle, rx: RxPacket },
    /// Periodic-scan operation ran without a reception; ends the operation
    PeriodicMissed { handle: SyncHandle },
    /// Operation removed, aborted, or (for scan windows) finished
    OpEnd { owner: OpOwner },
    /// Result of an active-scan request
    ScanRspOutcome { phy: Phy, success: bool },
}

/// `LL_PERIODIC_SYNC_IND` forwarded by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTransferMsg {
    pub conn_handle: u16,
    /// Full PDU: opcode and control data
    pub pdu: Bytes,
    /// Connection event counter in which the PDU was received
    pub rx_conn_event: u16,
    /// Anchor of that connection event
    pub rx_conn_anchor: Tick,
    pub conn_interval_usec: u32,
}

/// Connection event a locally built sync transfer is referenced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnEventRef {
    pub conn_handle: u16,
    pub event_counter: u16,
    pub anchor: Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlMessage {
    Radio(RadioEvent),
    Timer(TimerId),
    SyncTransfer(SyncTransferMsg),
}
