//! Per-context tracking machine and periodic reception handling.

use bytes::BufMut;
use contracts::{
    DataStatus, HciStatus, HostEvent, HostNotifier, Platform, SyncHandle, TimerService,
};
use sync_pdu::ExtAdvPdu;
use timing::{advance, window_widening};
use tracing::{debug, info, instrument, warn};

use crate::acad::parse_acad;
use crate::context::{CreatedVia, PeriodicSyncContext, MAX_REPORT_LEN};
use crate::engine::{apply_acad, LinkLayer};
use crate::establish::EstablishEvent;
use crate::event::RxPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerScanState {
    #[default]
    Disabled,
    SyncEstablished,
    SyncTerminating,
    Resetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerScanEvent {
    Reset,
    SyncEstablished,
    Terminate,
    TerminateDone,
    SupervisionTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerScanAction {
    /// Notify the host that the sync is up
    Established,
    /// Host terminate: remove the operation
    Terminate,
    /// Supervision expired: report the loss and remove the operation
    Timeout,
    /// Reset: remove the operation
    Shutdown,
    /// Operation gone: release the context
    Cleanup,
}

/// `(action, next state)` for `event` in `state`.
pub fn transition(
    state: PerScanState,
    event: PerScanEvent,
) -> (Option<PerScanAction>, PerScanState) {
    use PerScanAction as A;
    use PerScanEvent as E;
    use PerScanState as S;

    match (state, event) {
        (S::Disabled, E::SyncEstablished) => (Some(A::Established), S::SyncEstablished),

        (S::SyncEstablished, E::Reset) => (Some(A::Shutdown), S::Resetting),
        (S::SyncEstablished, E::Terminate) => (Some(A::Terminate), S::SyncTerminating),
        (S::SyncEstablished, E::SupervisionTimeout) => (Some(A::Timeout), S::SyncTerminating),

        (S::SyncTerminating, E::TerminateDone) | (S::Resetting, E::TerminateDone) => {
            (Some(A::Cleanup), S::Disabled)
        }
        (S::SyncTerminating, E::Reset) => (None, S::Resetting),

        (state, _) => (None, state),
    }
}

/// Events to skip ahead after a reception.
///
/// Skipping is dropped when the gap plus its drift would reach the
/// supervision timeout.
fn events_after_rx(ctx: &PeriodicSyncContext, local_ppm: u32) -> u16 {
    if !ctx.is_established() || ctx.skip == 0 {
        return 1;
    }
    let events = ctx.skip.saturating_add(1);
    let gap = events as u64 * ctx.interval_usec as u64;
    let drift = window_widening(
        gap.min(u32::MAX as u64) as u32,
        local_ppm + ctx.advertiser_sca.ppm() as u32,
    );
    if gap + drift as u64 >= ctx.sup_timeout_usec as u64 {
        1
    } else {
        events
    }
}

impl<P: Platform> LinkLayer<P> {
    pub(crate) fn execute_per_scan(&mut self, handle: SyncHandle, event: PerScanEvent) {
        let Some(ctx) = self.pool.get_mut(handle) else {
            debug!(%handle, ?event, "Event for released context ignored");
            return;
        };
        let (action, next) = transition(ctx.state, event);
        debug!(%handle, state = ?ctx.state, ?event, ?next, "Per-scan transition");
        ctx.state = next;

        if let Some(action) = action {
            self.run_per_scan_action(handle, action);
        }
    }

    fn run_per_scan_action(&mut self, handle: SyncHandle, action: PerScanAction) {
        match action {
            PerScanAction::Established => self.report_established(handle),
            PerScanAction::Terminate | PerScanAction::Shutdown => self.request_op_removal(handle),
            PerScanAction::Timeout => {
                if let Some(ctx) = self.pool.get(handle) {
                    let timer = ctx.sup_timer;
                    self.platform.timers().disarm(timer);
                }
                warn!(%handle, "Periodic sync lost");
                observability::record_sync_lost();
                self.platform.host().deliver(HostEvent::SyncLost { handle });
                self.request_op_removal(handle);
            }
            PerScanAction::Cleanup => self.release_context(handle),
        }
    }

    fn report_established(&mut self, handle: SyncHandle) {
        let Some(ctx) = self.pool.get(handle) else {
            return;
        };
        let event = match ctx.created_via {
            CreatedVia::DirectScan => {
                observability::record_sync_established("scan");
                HostEvent::SyncEstablished(ctx.established_report(HciStatus::Success))
            }
            CreatedVia::Transfer { .. } => {
                observability::record_sync_established("transfer");
                HostEvent::SyncTransferReceived(ctx.transfer_report(HciStatus::Success))
            }
        };
        info!(
            %handle,
            identity = %ctx.identity,
            interval = ctx.interval_units(),
            "Periodic sync established"
        );
        self.platform.host().deliver(event);
    }

    #[instrument(level = "trace", name = "periodic_rx", skip(self, rx), fields(rssi = rx.rssi))]
    pub(crate) fn on_periodic_rx(&mut self, handle: SyncHandle, rx: RxPacket) {
        let local_ppm = self.config.local_clock_accuracy_ppm as u32;
        let Some(ctx) = self.pool.get_mut(handle) else {
            debug!(%handle, "Reception for released context ignored");
            return;
        };
        ctx.op = None;
        if ctx.shutting_down {
            self.finish_teardown(handle);
            return;
        }

        let pdu = match ExtAdvPdu::decode(rx.pdu) {
            Ok(pdu) => pdu,
            Err(err) => {
                debug!(%handle, error = %err, "Undecodable periodic packet counted as missed");
                self.on_missed_event(handle);
                return;
            }
        };

        let observed = ctx.next;
        ctx.anchor = timing::Anchor::new(rx.start, observed.event_counter);
        ctx.base_widening_usec = 0;
        ctx.missed_events = 0;
        ctx.sup_deadline = rx.start.wrapping_add(ctx.sup_timeout_usec);
        let (timer, timeout) = (ctx.sup_timer, ctx.sup_timeout_usec);

        for params in parse_acad(&pdu.acad) {
            let instant = params.instant();
            if ctx.acad.ingest(params, observed.event_counter) {
                debug!(%handle, instant, "ACAD update pending");
            } else {
                debug!(%handle, instant, "ACAD update ignored");
            }
        }
        for params in ctx.acad.take_due(observed.event_counter) {
            apply_acad(ctx, params);
        }

        let report = (!ctx.reporting_disabled).then(|| build_report(ctx, &pdu, rx.rssi));
        self.platform.timers().arm(timer, timeout);

        if let Some(machine) = self.discovering_machine(handle) {
            self.execute_per_scan(handle, PerScanEvent::SyncEstablished);
            if let Err(err) = self.execute_establish(machine, EstablishEvent::Done) {
                warn!(%handle, ?machine, error = %err, "Establishment hand-over failed");
            }
        }

        if let Some(report) = report {
            observability::record_periodic_report(rx.rssi);
            self.platform.host().deliver(report);
        }

        let Some(ctx) = self.pool.get(handle) else {
            return;
        };
        let next = advance(ctx.anchor, events_after_rx(ctx, local_ppm), ctx.interval_usec);
        if let Err(err) = self.schedule_sync_op(handle, next) {
            self.on_schedule_failure(handle, err);
        }
    }

    pub(crate) fn on_periodic_missed(&mut self, handle: SyncHandle) {
        let Some(ctx) = self.pool.get_mut(handle) else {
            return;
        };
        ctx.op = None;
        if ctx.shutting_down {
            self.finish_teardown(handle);
            return;
        }
        self.on_missed_event(handle);
    }

    /// Operation ended without a reception callback.
    pub(crate) fn on_periodic_op_end(&mut self, handle: SyncHandle) {
        let Some(ctx) = self.pool.get_mut(handle) else {
            return;
        };
        ctx.op = None;
        if ctx.shutting_down {
            self.finish_teardown(handle);
            return;
        }
        debug!(%handle, "Periodic operation aborted");
        self.on_missed_event(handle);
    }

    fn on_missed_event(&mut self, handle: SyncHandle) {
        let limit = self.config.establish_event_limit;
        let Some(ctx) = self.pool.get_mut(handle) else {
            return;
        };
        ctx.missed_events = ctx.missed_events.saturating_add(1);
        observability::record_missed_event();
        let exhausted = !ctx.is_established() && ctx.missed_events >= limit;
        let next = advance(ctx.next, 1, ctx.interval_usec);

        if exhausted {
            if let Some(machine) = self.discovering_machine(handle) {
                info!(%handle, missed = limit, "No reception from target, abandoning");
                observability::record_sync_failed("no_reception");
                if let Err(err) = self.execute_establish(machine, EstablishEvent::Failed) {
                    warn!(%handle, error = %err, "Failed to abandon establishment");
                }
                return;
            }
        }
        if let Err(err) = self.schedule_sync_op(handle, next) {
            self.on_schedule_failure(handle, err);
        }
    }

    pub(crate) fn on_supervision_timeout(&mut self, handle: SyncHandle) {
        if self.pool.get(handle).is_none() {
            debug!(%handle, "Stale supervision timer ignored");
            return;
        }
        match self.discovering_machine(handle) {
            Some(machine) => {
                info!(%handle, "Supervision expired before first reception");
                observability::record_sync_failed("supervision_timeout");
                if let Err(err) = self.execute_establish(machine, EstablishEvent::Failed) {
                    warn!(%handle, error = %err, "Failed to abandon establishment");
                }
            }
            None => self.execute_per_scan(handle, PerScanEvent::SupervisionTimeout),
        }
    }

    /// Host control of periodic advertising reports on one sync.
    pub fn set_periodic_receive_enable(
        &mut self,
        handle: SyncHandle,
        enable: bool,
    ) -> Result<(), contracts::LinkLayerError> {
        let ctx = self
            .pool
            .get_mut(handle)
            .ok_or(contracts::LinkLayerError::UnknownSyncHandle(handle))?;
        ctx.reporting_disabled = !enable;
        debug!(%handle, enable, "Periodic reporting toggled");
        Ok(())
    }
}

fn build_report(ctx: &mut PeriodicSyncContext, pdu: &ExtAdvPdu, rssi: i8) -> HostEvent {
    ctx.report_buf.clear();
    let take = pdu.adv_data.len().min(MAX_REPORT_LEN);
    ctx.report_buf.put_slice(&pdu.adv_data[..take]);

    let data_status = if take < pdu.adv_data.len() {
        DataStatus::Truncated
    } else if pdu.aux_ptr.is_some() {
        DataStatus::Incomplete
    } else {
        DataStatus::Complete
    };
    HostEvent::PeriodicAdvReport {
        handle: ctx.handle,
        tx_power: pdu.tx_power.unwrap_or(0x7F),
        rssi,
        data_status,
        data: ctx.report_buf.split().freeze(),
    }
}
