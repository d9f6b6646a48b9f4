//! Per-train synchronization context.

use bytes::BytesMut;
use contracts::{
    AdvIdentity, OpId, Phy, Sca, SyncEstablishedReport, SyncHandle, SyncTransferReport, Tick,
    TimerId, HciStatus,
};
use timing::{Anchor, PERIODIC_INTERVAL_UNIT_USEC};

use crate::acad::AcadTable;
use crate::chan_sel::ChannelSelection;
use crate::per_scan::PerScanState;

/// Largest periodic report payload handed to the host.
pub const MAX_REPORT_LEN: usize = 1_650;

/// Why an establishing sync is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Host cancelled; the host event carries a zeroed payload
    ByHost,
    /// Establishment failed; the host event carries what was learned
    InternalFailure,
}

/// How the train's schedule was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreatedVia {
    #[default]
    DirectScan,
    Transfer { conn_handle: u16, service_data: u16 },
}

#[derive(Debug, Clone)]
pub struct PeriodicSyncContext {
    pub handle: SyncHandle,

    // lifecycle
    pub enabled: bool,
    pub state: PerScanState,
    pub shutting_down: bool,
    pub cancel: Option<CancelReason>,
    pub reporting_disabled: bool,

    // identity
    pub identity: AdvIdentity,
    pub created_via: CreatedVia,
    pub phy: Phy,
    pub advertiser_sca: Sca,
    pub access_address: u32,
    pub crc_init: u32,

    // schedule
    pub interval_usec: u32,
    /// Last confirmed (or reference) occurrence
    pub anchor: Anchor,
    /// Occurrence targeted by the outstanding operation
    pub next: Anchor,
    /// Widening inherited from how the schedule was learned; cleared on first reception
    pub base_widening_usec: u32,
    /// Widening applied to the outstanding operation
    pub rx_slop_usec: u32,
    pub skip: u16,
    pub missed_events: u16,

    // channel
    pub chan_sel: ChannelSelection,
    pub next_channel: u8,

    // radio binding
    pub op: Option<OpId>,

    // supervision
    pub sup_timer: TimerId,
    pub sup_timeout_usec: u32,
    pub sup_deadline: Tick,

    pub holds_list_ref: bool,
    pub acad: AcadTable,
    pub report_buf: BytesMut,
}

impl PeriodicSyncContext {
    /// Zeroed slot for `handle`.
    pub fn vacant(handle: SyncHandle) -> Self {
        Self {
            handle,
            enabled: false,
            state: PerScanState::Disabled,
            shutting_down: false,
            cancel: None,
            reporting_disabled: false,
            identity: AdvIdentity::default(),
            created_via: CreatedVia::DirectScan,
            phy: Phy::Le1M,
            advertiser_sca: Sca::default(),
            access_address: 0,
            crc_init: 0,
            interval_usec: 0,
            anchor: Anchor::default(),
            next: Anchor::default(),
            base_widening_usec: 0,
            rx_slop_usec: 0,
            skip: 0,
            missed_events: 0,
            chan_sel: ChannelSelection::default(),
            next_channel: 0,
            op: None,
            sup_timer: TimerId::Supervision(handle),
            sup_timeout_usec: 0,
            sup_deadline: 0,
            holds_list_ref: false,
            acad: AcadTable::default(),
            report_buf: BytesMut::new(),
        }
    }

    /// Interval in 1.25 ms units as reported to the host.
    pub fn interval_units(&self) -> u16 {
        (self.interval_usec / PERIODIC_INTERVAL_UNIT_USEC) as u16
    }

    pub fn is_established(&self) -> bool {
        self.state == PerScanState::SyncEstablished
    }

    /// Supervision budget left at `at`, zero once the deadline passed.
    pub fn sup_remaining_at(&self, at: Tick) -> u32 {
        let left = contracts::tick_diff(self.sup_deadline, at);
        left.max(0) as u32
    }

    pub fn established_report(&self, status: HciStatus) -> SyncEstablishedReport {
        SyncEstablishedReport {
            status,
            handle: self.handle,
            sid: self.identity.sid,
            addr: self.identity.addr,
            addr_type: self.identity.addr_type,
            phy: Some(self.phy),
            interval: self.interval_units(),
            advertiser_sca: self.advertiser_sca,
        }
    }

    pub fn transfer_report(&self, status: HciStatus) -> SyncTransferReport {
        let (conn_handle, service_data) = match self.created_via {
            CreatedVia::Transfer {
                conn_handle,
                service_data,
            } => (conn_handle, service_data),
            CreatedVia::DirectScan => (0, 0),
        };
        SyncTransferReport {
            status,
            conn_handle,
            service_data,
            handle: self.handle,
            sid: self.identity.sid,
            addr: self.identity.addr,
            addr_type: self.identity.addr_type,
            phy: Some(self.phy),
            interval: self.interval_units(),
            advertiser_sca: self.advertiser_sca,
        }
    }
}
