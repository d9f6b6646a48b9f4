//! Transfer-sync: establish a sync from a peer's `LL_PERIODIC_SYNC_IND`.

use contracts::{
    HciStatus, HostEvent, HostNotifier, LinkLayerError, PastParams, Platform, Sca, SyncHandle,
    SyncTransferMode, SyncTransferReport, Tick,
};
use sync_pdu::{PduError, PeriodicSyncInd};
use timing::{compound_drift_for_transfer, events_until, Anchor, Span};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::context::{CancelReason, CreatedVia};
use crate::create_sync::SyncPlan;
use crate::engine::{LinkLayer, Machine};
use crate::establish::{EstablishAction, EstablishEvent, EstablishState};
use crate::event::SyncTransferMsg;

/// Highest HCI connection handle.
const MAX_CONN_HANDLE: u16 = 0x0EFF;

/// First anchor and widening derived from a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTiming {
    /// Anchor of the connection event the offset is measured from
    pub ref_conn_anchor: Tick,
    pub first_anchor: Anchor,
    pub base_widening_usec: u32,
}

impl TransferTiming {
    /// Reconstruct the train's first expected occurrence as seen locally.
    pub fn derive(msg: &SyncTransferMsg, ind: &PeriodicSyncInd, local_ppm: u16) -> Self {
        let info = &ind.sync_info;

        let conn_events_back = events_until(ind.conn_event_count, msg.rx_conn_event) as i64;
        let back_usec = conn_events_back * msg.conn_interval_usec as i64;
        let ref_conn_anchor = msg.rx_conn_anchor.wrapping_sub(back_usec as u32);

        let first_anchor = Anchor::new(
            ref_conn_anchor.wrapping_add(info.offset.to_usec()),
            info.event_counter,
        );

        let train = Span::new(
            events_until(ind.last_pa_event_counter, info.event_counter).unsigned_abs() as u32,
            info.interval_usec(),
        );
        let conn = Span::new(
            events_until(ind.sync_conn_event_count, msg.rx_conn_event).unsigned_abs() as u32,
            msg.conn_interval_usec,
        );
        let drift =
            compound_drift_for_transfer(train, conn, local_ppm, info.sca.ppm(), ind.sca.ppm());

        Self {
            ref_conn_anchor,
            first_anchor,
            base_widening_usec: drift.saturating_add(info.offset.units.usec()),
        }
    }
}

/// Accepted transfer waiting for the Start action.
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub msg: SyncTransferMsg,
    pub ind: PeriodicSyncInd,
    pub params: PastParams,
}

#[derive(Debug, Clone, Default)]
pub struct TransferSyncCtrl {
    pub state: EstablishState,
    pub ctx: Option<SyncHandle>,
    pub pending: Option<PendingTransfer>,
    pub timing: Option<TransferTiming>,
}

impl<P: Platform> LinkLayer<P> {
    #[instrument(level = "debug", name = "sync_transfer", skip(self, msg), fields(conn = msg.conn_handle))]
    pub(crate) fn on_sync_transfer(&mut self, msg: SyncTransferMsg) {
        let params = self.past_params_for(msg.conn_handle);
        if params.mode == SyncTransferMode::Off {
            debug!("Sync transfer ignored, receiving disabled");
            observability::record_transfer_dropped("disabled");
            return;
        }
        let pool = &self.pool;
        let ind = match PeriodicSyncInd::decode_checked(&msg.pdu, |identity| {
            pool.find_by_identity(identity).is_some()
        }) {
            Ok(ind) => ind,
            Err(PduError::AlreadySynced(identity)) => {
                debug!(%identity, "Sync transfer for tracked train dropped");
                observability::record_transfer_dropped("duplicate");
                return;
            }
            Err(err) => {
                warn!(error = %err, "Malformed sync transfer dropped");
                observability::record_transfer_dropped("malformed");
                return;
            }
        };
        if let Err(err) = ind.sync_info.validate() {
            warn!(error = %err, "Sync transfer with invalid SyncInfo dropped");
            observability::record_transfer_dropped("malformed");
            return;
        }

        self.transfer.pending = Some(PendingTransfer { msg, ind, params });
        if let Err(err) = self.execute_establish(Machine::Transfer, EstablishEvent::Start) {
            debug!(error = %err, "Sync transfer could not start");
            observability::record_transfer_dropped("start_failed");
            self.transfer.pending = None;
        }
    }

    pub(crate) fn run_transfer_action(
        &mut self,
        action: EstablishAction,
    ) -> Result<(), LinkLayerError> {
        match action {
            EstablishAction::Start => self.transfer_start(),
            EstablishAction::RejectStart => {
                let conn = self.transfer.pending.take().map(|pending| pending.msg.conn_handle);
                warn!(state = ?self.transfer.state, ?conn, "Transfer-sync busy, transfer ignored");
                observability::record_transfer_dropped("busy");
                Ok(())
            }
            EstablishAction::Cancel => {
                self.abandon_establishing(self.transfer.ctx, CancelReason::ByHost);
                Ok(())
            }
            EstablishAction::Fail => {
                self.abandon_establishing(self.transfer.ctx, CancelReason::InternalFailure);
                Ok(())
            }
            EstablishAction::Done => {
                debug!(handle = ?self.transfer.ctx, "Transfer-sync handed over");
                self.transfer.ctx = None;
                self.transfer.timing = None;
                Ok(())
            }
            EstablishAction::Terminate => {
                self.transfer_terminate();
                Ok(())
            }
            EstablishAction::ResetShutdown => {
                if let Some(handle) = self.transfer.ctx {
                    self.request_op_removal(handle);
                }
                Ok(())
            }
            EstablishAction::ResetTerminate => {
                if let Some(handle) = self.transfer.ctx.take() {
                    self.release_context(handle);
                }
                self.transfer.timing = None;
                Ok(())
            }
        }
    }

    fn transfer_start(&mut self) -> Result<(), LinkLayerError> {
        let PendingTransfer { msg, ind, params } = self
            .transfer
            .pending
            .take()
            .ok_or_else(|| LinkLayerError::disallowed("no sync transfer pending"))?;

        let timing = TransferTiming::derive(&msg, &ind, self.config.local_clock_accuracy_ppm);
        let plan = SyncPlan {
            identity: ind.identity(),
            created_via: CreatedVia::Transfer {
                conn_handle: msg.conn_handle,
                service_data: ind.id,
            },
            phy: ind.phy,
            sync_info: ind.sync_info,
            first_anchor: timing.first_anchor,
            base_widening_usec: timing.base_widening_usec,
            skip: params.skip,
            sync_timeout_usec: params.sync_timeout_10ms as u32 * 10_000,
            reporting_disabled: params.mode == SyncTransferMode::ReportsDisabled,
            uses_adv_list: false,
        };

        let handle = self.begin_sync(plan)?;
        self.transfer.ctx = Some(handle);
        self.transfer.timing = Some(timing);
        info!(
            %handle,
            identity = %plan.identity,
            conn = msg.conn_handle,
            widening_usec = timing.base_widening_usec,
            "Transfer-sync discovering"
        );
        Ok(())
    }

    fn transfer_terminate(&mut self) {
        let Some(handle) = self.transfer.ctx.take() else {
            return;
        };
        self.transfer.timing = None;
        let report = self.pool.get(handle).map(|ctx| match ctx.cancel {
            Some(CancelReason::InternalFailure) => {
                ctx.transfer_report(HciStatus::ConnectionFailedToEstablish)
            }
            Some(CancelReason::ByHost) | None => {
                let full = ctx.transfer_report(HciStatus::OperationCancelledByHost);
                SyncTransferReport {
                    status: full.status,
                    conn_handle: full.conn_handle,
                    service_data: full.service_data,
                    ..Default::default()
                }
            }
        });
        self.release_context(handle);

        if let Some(report) = report {
            info!(%handle, status = ?report.status, "Transfer-sync ended without sync");
            self.platform
                .host()
                .deliver(HostEvent::SyncTransferReceived(report));
        }
    }

    fn past_params_for(&self, conn_handle: u16) -> PastParams {
        self.past
            .get(&conn_handle)
            .copied()
            .unwrap_or(self.config.past_defaults)
    }

    /// Default PAST receive parameters for connections without their own.
    pub fn set_default_past_params(&mut self, params: PastParams) -> Result<(), LinkLayerError> {
        params
            .validate()
            .map_err(|err| LinkLayerError::invalid_param("past_params", err.to_string()))?;
        self.config.past_defaults = params;
        Ok(())
    }

    /// PAST receive parameters for one connection.
    pub fn set_past_params(
        &mut self,
        conn_handle: u16,
        params: PastParams,
    ) -> Result<(), LinkLayerError> {
        if conn_handle > MAX_CONN_HANDLE {
            return Err(LinkLayerError::UnknownConnection(conn_handle));
        }
        params
            .validate()
            .map_err(|err| LinkLayerError::invalid_param("past_params", err.to_string()))?;
        self.past.insert(conn_handle, params);
        debug!(conn = conn_handle, mode = ?params.mode, "PAST parameters set");
        Ok(())
    }

    /// Build an `LL_PERIODIC_SYNC_IND` describing an established sync.
    ///
    /// The offset is referenced to `conn`; the caller sends the returned PDU
    /// in that connection event.
    #[instrument(level = "debug", name = "periodic_sync_transfer", skip(self))]
    pub fn periodic_sync_transfer(
        &self,
        conn: crate::event::ConnEventRef,
        service_data: u16,
        handle: SyncHandle,
    ) -> Result<bytes::Bytes, LinkLayerError> {
        let ctx = self
            .pool
            .get(handle)
            .filter(|ctx| ctx.is_established())
            .ok_or(LinkLayerError::UnknownSyncHandle(handle))?;

        let target = timing::compute_anchor(conn.anchor, ctx.interval_usec, ctx.anchor)?;
        let offset = timing::SyncOffset::from_usec(target.tick.wrapping_sub(conn.anchor))?;
        let ind = PeriodicSyncInd {
            id: service_data,
            sync_info: sync_pdu::SyncInfo {
                offset,
                interval: ctx.interval_units(),
                channel_map: ctx.chan_sel.map(),
                sca: ctx.advertiser_sca,
                access_address: ctx.access_address,
                crc_init: ctx.crc_init,
                event_counter: target.event_counter,
            },
            conn_event_count: conn.event_counter,
            last_pa_event_counter: ctx.anchor.event_counter,
            sid: ctx.identity.sid,
            addr_type: ctx.identity.addr_type,
            sca: Sca::from_ppm(self.config.local_clock_accuracy_ppm),
            phy: ctx.phy,
            adv_addr: ctx.identity.addr,
            sync_conn_event_count: conn.event_counter,
        };
        info!(%handle, conn = conn.conn_handle, counter = target.event_counter, "Sync transfer built");
        Ok(ind.encode())
    }
}
