//! Link-layer sync engine: owned state and the single dispatch entry point.

use std::collections::{HashMap, VecDeque};

use contracts::{
    tick_diff, ConflictView, LinkLayerConfig, LinkLayerError, OpOwner, PastParams, Phy, Platform,
    ProtocolMode, RadioOp, RadioScheduler, ScheduleError, SyncHandle, TimerId, TimerService,
    Baseband,
};
use timing::{advance, compute_anchor, offset_is_schedulable, window_widening, Anchor,
    MIN_SCHEDULE_OFFSET_USEC};
use tracing::{debug, instrument, warn};

use crate::acad::AcadParams;
use crate::adv_list::PeriodicAdvList;
use crate::conflict::ConflictPolicy;
use crate::context::PeriodicSyncContext;
use crate::create_sync::CreateSyncCtrl;
use crate::establish::{EstablishEvent, EstablishState};
use crate::event::{LlMessage, RadioEvent};
use crate::ext_scan::{ExtScanContext, ExtScanEvent};
use crate::pool::SyncContextPool;
use crate::transfer_sync::TransferSyncCtrl;

/// Longest periodic packet on air for each PHY.
fn max_packet_usec(phy: Phy) -> u32 {
    match phy {
        Phy::Le1M => 2_120,
        Phy::Le2M => 1_064,
        Phy::LeCoded => 17_040,
    }
}

/// Which machine currently owns a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Steward {
    Create,
    Transfer,
    Tracking,
}

/// Singleton establishing machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Machine {
    Create,
    Transfer,
}

/// Master-side periodic advertising sync engine.
///
/// All state lives here; every external stimulus enters through
/// [`LinkLayer::dispatch`] or one of the host commands and runs to
/// completion before the next is accepted.
pub struct LinkLayer<P: Platform> {
    pub(crate) config: LinkLayerConfig,
    pub(crate) platform: P,
    pub(crate) pool: SyncContextPool,
    pub(crate) conflict: ConflictPolicy,
    pub(crate) adv_list: PeriodicAdvList,
    pub(crate) scanners: Vec<ExtScanContext>,
    pub(crate) create: CreateSyncCtrl,
    pub(crate) transfer: TransferSyncCtrl,
    pub(crate) past: HashMap<u16, PastParams>,
    deferred: VecDeque<LlMessage>,
}

impl<P: Platform> LinkLayer<P> {
    pub fn new(config: LinkLayerConfig, platform: P) -> Self {
        let scanners = [Phy::Le1M, Phy::LeCoded]
            .into_iter()
            .map(|phy| ExtScanContext::new(phy, config.ext_scan))
            .collect();

        tracing::info!(
            max_periodic_syncs = config.max_periodic_syncs,
            local_ppm = config.local_clock_accuracy_ppm,
            "Link layer sync engine initialized"
        );

        Self {
            pool: SyncContextPool::new(config.max_periodic_syncs),
            conflict: ConflictPolicy::new(config.conflict_interval_ratio),
            adv_list: PeriodicAdvList::new(config.periodic_adv_list_size),
            scanners,
            create: CreateSyncCtrl::default(),
            transfer: TransferSyncCtrl::default(),
            past: HashMap::new(),
            deferred: VecDeque::new(),
            config,
            platform,
        }
    }

    /// Process one message and everything it triggers internally.
    pub fn dispatch(&mut self, msg: LlMessage) {
        self.deferred.push_back(msg);
        self.drain();
    }

    pub fn config(&self) -> &LinkLayerConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn pool(&self) -> &SyncContextPool {
        &self.pool
    }

    pub fn context(&self, handle: SyncHandle) -> Option<&PeriodicSyncContext> {
        self.pool.get(handle)
    }

    pub fn create_sync_state(&self) -> EstablishState {
        self.create.state
    }

    pub fn create_sync_pending(&self) -> bool {
        self.create.pending
    }

    /// Context being populated by create-sync, if any.
    pub fn create_sync_context(&self) -> Option<SyncHandle> {
        self.create.ctx
    }

    pub fn transfer_sync_state(&self) -> EstablishState {
        self.transfer.state
    }

    pub fn transfer_sync_context(&self) -> Option<SyncHandle> {
        self.transfer.ctx
    }

    pub(crate) fn drain(&mut self) {
        while let Some(msg) = self.deferred.pop_front() {
            self.handle(msg);
        }
    }

    /// Queue an internally raised message behind the one being processed.
    pub(crate) fn post(&mut self, msg: LlMessage) {
        self.deferred.push_back(msg);
    }

    fn handle(&mut self, msg: LlMessage) {
        match msg {
            LlMessage::Radio(event) => self.on_radio(event),
            LlMessage::Timer(id) => self.on_timer(id),
            LlMessage::SyncTransfer(msg) => self.on_sync_transfer(msg),
        }
    }

    fn on_radio(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::AdvReceived { phy, rx } => self.on_adv_received(phy, rx),
            RadioEvent::PeriodicRx { handle, rx } => self.on_periodic_rx(handle, rx),
            RadioEvent::PeriodicMissed { handle } => self.on_periodic_missed(handle),
            RadioEvent::OpEnd {
                owner: OpOwner::PeriodicScan(handle),
            } => self.on_periodic_op_end(handle),
            RadioEvent::OpEnd {
                owner: OpOwner::ExtScan(phy),
            } => self.on_scan_window_end(phy),
            RadioEvent::ScanRspOutcome { phy, success } => {
                if let Some(scanner) = self.scanner_mut(phy) {
                    scanner.backoff.record(success);
                }
            }
        }
    }

    #[instrument(level = "debug", name = "ll_timer", skip(self))]
    fn on_timer(&mut self, id: TimerId) {
        match id {
            TimerId::Supervision(handle) => self.on_supervision_timeout(handle),
            TimerId::ScanDuration(phy) => {
                if let Some(scanner) = self.scanner_mut(phy) {
                    scanner.duration_expired = true;
                }
                self.execute_ext_scan(phy, ExtScanEvent::DurationExpired);
            }
            TimerId::ScanPeriod(phy) => self.execute_ext_scan(phy, ExtScanEvent::PeriodExpired),
        }
    }

    pub(crate) fn steward(&self, handle: SyncHandle) -> Steward {
        if self.create.ctx == Some(handle) {
            Steward::Create
        } else if self.transfer.ctx == Some(handle) {
            Steward::Transfer
        } else {
            Steward::Tracking
        }
    }

    pub(crate) fn establish_state(&self, machine: Machine) -> EstablishState {
        match machine {
            Machine::Create => self.create.state,
            Machine::Transfer => self.transfer.state,
        }
    }

    /// Run one event through an establishing machine.
    ///
    /// A failed action leaves the machine in its current state.
    pub(crate) fn execute_establish(
        &mut self,
        machine: Machine,
        event: EstablishEvent,
    ) -> Result<(), LinkLayerError> {
        let state = self.establish_state(machine);
        let (action, next) = crate::establish::transition(state, event);
        debug!(?machine, ?state, ?event, ?next, "Establish transition");

        if let Some(action) = action {
            let result = match machine {
                Machine::Create => self.run_create_action(action),
                Machine::Transfer => self.run_transfer_action(action),
            };
            if let Err(err) = result {
                warn!(?machine, ?action, error = %err, "Establish action failed");
                return Err(err);
            }
        }
        match machine {
            Machine::Create => self.create.state = next,
            Machine::Transfer => self.transfer.state = next,
        }
        Ok(())
    }

    /// Establishing machine that owns `handle` while it is still discovering.
    pub(crate) fn discovering_machine(&self, handle: SyncHandle) -> Option<Machine> {
        let machine = match self.steward(handle) {
            Steward::Create => Machine::Create,
            Steward::Transfer => Machine::Transfer,
            Steward::Tracking => return None,
        };
        (self.establish_state(machine) == EstablishState::Discovering).then_some(machine)
    }

    /// The context's radio operation is gone; finish whichever teardown is in progress.
    pub(crate) fn finish_teardown(&mut self, handle: SyncHandle) {
        let result = match self.steward(handle) {
            Steward::Create => self.execute_establish(Machine::Create, EstablishEvent::Terminate),
            Steward::Transfer => {
                self.execute_establish(Machine::Transfer, EstablishEvent::Terminate)
            }
            Steward::Tracking => {
                self.execute_per_scan(handle, crate::per_scan::PerScanEvent::TerminateDone);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(%handle, error = %err, "Teardown did not complete");
        }
    }

    /// Mark the context as shutting down and ask the scheduler to drop its operation.
    ///
    /// The end notification arrives later; with nothing outstanding it is raised here.
    pub(crate) fn request_op_removal(&mut self, handle: SyncHandle) {
        let Some(ctx) = self.pool.get_mut(handle) else {
            return;
        };
        ctx.shutting_down = true;
        match ctx.op {
            Some(id) => {
                if !self.platform.scheduler().remove(id) {
                    debug!(%handle, "Operation already running; waiting for completion");
                }
            }
            None => self.post(LlMessage::Radio(RadioEvent::OpEnd {
                owner: OpOwner::PeriodicScan(handle),
            })),
        }
    }

    pub(crate) fn allocate_context(&mut self) -> Result<SyncHandle, LinkLayerError> {
        let handle = self
            .pool
            .allocate()
            .ok_or(LinkLayerError::PoolExhausted {
                capacity: self.pool.capacity(),
            })?;
        if self.pool.enabled_count() == 1 {
            self.platform.baseband().start(ProtocolMode::PeriodicScan);
        }
        observability::record_pool_occupancy(self.pool.enabled_count(), self.pool.capacity());
        Ok(handle)
    }

    /// Single exit path for every context.
    pub(crate) fn release_context(&mut self, handle: SyncHandle) {
        let Some(ctx) = self.pool.get_mut(handle) else {
            return;
        };
        let timer = ctx.sup_timer;
        let held_list_ref = std::mem::take(&mut ctx.holds_list_ref);
        ctx.op = None;

        self.platform.timers().disarm(timer);
        if held_list_ref {
            self.adv_list.release();
        }
        self.pool.release(handle);
        observability::record_pool_occupancy(self.pool.enabled_count(), self.pool.capacity());
        if self.pool.is_empty() {
            self.platform.baseband().stop(ProtocolMode::PeriodicScan);
        }
        debug!(%handle, "Context released");
    }

    /// Schedule the context's next reception at or after `from`.
    ///
    /// Operations displaced by the insertion are rescheduled in turn; their
    /// failures are handled here, the first context's failure is returned.
    pub(crate) fn schedule_sync_op(
        &mut self,
        handle: SyncHandle,
        from: Anchor,
    ) -> Result<(), LinkLayerError> {
        let mut work = VecDeque::from([(handle, from)]);
        let mut primary = Ok(());

        while let Some((current, from)) = work.pop_front() {
            match self.place_sync_op(current, from) {
                Ok(displaced) => {
                    for owner in displaced {
                        self.on_displaced(owner, &mut work);
                    }
                }
                Err(err) if current == handle => primary = Err(err),
                Err(err) => self.on_schedule_failure(current, err),
            }
        }
        primary
    }

    fn place_sync_op(
        &mut self,
        handle: SyncHandle,
        from: Anchor,
    ) -> Result<Vec<OpOwner>, LinkLayerError> {
        let now = self.platform.scheduler().now();
        let earliest = now.wrapping_add(self.config.schedule_setup_usec);
        let local_ppm = self.config.local_clock_accuracy_ppm as u32;
        let Some(ctx) = self.pool.get_mut(handle) else {
            return Ok(Vec::new());
        };
        let interval = ctx.interval_usec;

        let mut candidate = from;
        if tick_diff(candidate.tick, earliest) < 0 {
            candidate = compute_anchor(earliest, interval, candidate)?;
        }

        loop {
            if tick_diff(candidate.tick, ctx.sup_deadline) > 0 {
                return Err(ScheduleError::NoTime.into());
            }
            for params in ctx.acad.take_due(candidate.event_counter) {
                apply_acad(ctx, params);
            }

            let elapsed = candidate.tick.wrapping_sub(ctx.anchor.tick);
            let drift = window_widening(elapsed, local_ppm + ctx.advertiser_sca.ppm() as u32);
            let widening = ctx
                .base_widening_usec
                .saturating_add(drift)
                .min(interval / 2 - MIN_SCHEDULE_OFFSET_USEC);
            let due = candidate.tick.wrapping_sub(widening);
            if !offset_is_schedulable(tick_diff(due, now) as i64) {
                debug!(%handle, counter = candidate.event_counter, "Offset below minimum, skipping event");
                candidate = advance(candidate, 1, interval);
                continue;
            }

            let channel = ctx.chan_sel.channel_for(candidate.event_counter);
            let op = RadioOp {
                owner: OpOwner::PeriodicScan(handle),
                due,
                duration_usec: 2 * widening + max_packet_usec(ctx.phy),
                channel,
                phy: ctx.phy,
                access_address: ctx.access_address,
                crc_init: ctx.crc_init,
                priority: Some(ConflictView {
                    sup_remaining_usec: ctx.sup_remaining_at(candidate.tick),
                    interval_usec: interval,
                }),
            };

            match self.platform.scheduler().schedule_at(op, &self.conflict) {
                Ok(outcome) => {
                    ctx.op = Some(outcome.id());
                    ctx.next = candidate;
                    ctx.next_channel = channel;
                    ctx.rx_slop_usec = widening;
                    let displaced = match outcome {
                        contracts::ScheduleOutcome::Inserted(_) => Vec::new(),
                        contracts::ScheduleOutcome::Preempted { displaced, .. } => displaced,
                    };
                    return Ok(displaced);
                }
                Err(ScheduleError::Conflict { with }) => {
                    debug!(%handle, counter = candidate.event_counter, ?with, "Lost slot, trying next event");
                    candidate = advance(candidate, 1, interval);
                }
                Err(ScheduleError::TooLate { .. }) => {
                    candidate = advance(candidate, 1, interval);
                }
                Err(err @ ScheduleError::NoTime) => return Err(err.into()),
            }
        }
    }

    fn on_displaced(&mut self, owner: OpOwner, work: &mut VecDeque<(SyncHandle, Anchor)>) {
        match owner {
            OpOwner::PeriodicScan(handle) => {
                let Some(ctx) = self.pool.get_mut(handle) else {
                    return;
                };
                ctx.op = None;
                if ctx.shutting_down {
                    self.post(LlMessage::Radio(RadioEvent::OpEnd { owner }));
                } else {
                    work.push_back((handle, advance(ctx.next, 1, ctx.interval_usec)));
                }
            }
            OpOwner::ExtScan(phy) => self.on_scan_window_displaced(phy),
        }
    }

    /// No radio time could be found for an existing context.
    pub(crate) fn on_schedule_failure(&mut self, handle: SyncHandle, err: LinkLayerError) {
        match self.discovering_machine(handle) {
            Some(machine) => {
                warn!(%handle, error = %err, "Cannot schedule sync being established");
                observability::record_sync_failed("no_radio_time");
                if let Err(err) = self.execute_establish(machine, EstablishEvent::Failed) {
                    warn!(%handle, error = %err, "Failed to abandon establishment");
                }
            }
            None => {
                // supervision timer decides the sync's fate
                warn!(%handle, error = %err, "Cannot schedule periodic event");
            }
        }
    }

    pub(crate) fn scanner(&self, phy: Phy) -> Option<&ExtScanContext> {
        self.scanners.iter().find(|scanner| scanner.phy == phy)
    }

    pub(crate) fn scanner_mut(&mut self, phy: Phy) -> Option<&mut ExtScanContext> {
        self.scanners.iter_mut().find(|scanner| scanner.phy == phy)
    }
}

pub(crate) fn apply_acad(ctx: &mut PeriodicSyncContext, params: AcadParams) {
    match params {
        AcadParams::ChannelMapUpdate {
            channel_map,
            instant,
        } => {
            debug!(
                handle = %ctx.handle,
                instant,
                used = channel_map.used_count(),
                "Channel map update applied"
            );
            ctx.chan_sel.set_map(channel_map);
        }
    }
}
