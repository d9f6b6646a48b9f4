//! Create-sync: establish a sync on a train discovered by the extended scan.

use contracts::{
    AdvIdentity, HciStatus, HostEvent, HostNotifier, LinkLayerError, Phy, Platform,
    RadioScheduler, Tick, TimerService, MAX_SYNC_SKIP, MAX_SYNC_TIMEOUT_10MS, MIN_SYNC_TIMEOUT_10MS,
};
use sync_pdu::SyncInfo;
use timing::{window_widening, Anchor};
use tracing::{debug, info, instrument, warn};

use crate::adv_list::PeriodicAdvList;
use crate::context::{CancelReason, CreatedVia};
use crate::engine::{LinkLayer, Machine};
use crate::establish::{EstablishAction, EstablishEvent, EstablishState};

/// Where the target identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPolicy {
    #[default]
    UseParams,
    UseAdvList,
}

/// Host parameters of a create-sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateSyncParams {
    pub filter_policy: FilterPolicy,
    pub sid: u8,
    pub addr: contracts::BdAddr,
    pub addr_type: contracts::AddrType,
    pub skip: u16,
    pub sync_timeout_10ms: u16,
    /// Start with periodic advertising reports disabled
    pub reporting_disabled: bool,
}

impl CreateSyncParams {
    pub fn validate(&self) -> Result<(), LinkLayerError> {
        if self.sid > 0x0F {
            return Err(LinkLayerError::invalid_param("sid", "must be at most 0x0F"));
        }
        if self.skip > MAX_SYNC_SKIP {
            return Err(LinkLayerError::invalid_param("skip", "must be at most 0x01F3"));
        }
        if !(MIN_SYNC_TIMEOUT_10MS..=MAX_SYNC_TIMEOUT_10MS).contains(&self.sync_timeout_10ms) {
            return Err(LinkLayerError::invalid_param(
                "sync_timeout",
                "must be within 0x000A..=0x4000",
            ));
        }
        Ok(())
    }

    pub fn identity(&self) -> AdvIdentity {
        AdvIdentity::new(self.addr, self.addr_type, self.sid)
    }

    /// Whether an advertiser is the one this request waits for.
    pub fn matches(&self, identity: &AdvIdentity, list: &PeriodicAdvList) -> bool {
        match self.filter_policy {
            FilterPolicy::UseParams => *identity == self.identity(),
            FilterPolicy::UseAdvList => list.contains(identity),
        }
    }

    pub fn sync_timeout_usec(&self) -> u32 {
        self.sync_timeout_10ms as u32 * 10_000
    }
}

/// An advertisement carrying the target's SyncInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCandidate {
    pub identity: AdvIdentity,
    pub sync_info: SyncInfo,
    /// Start of the packet that carried the SyncInfo
    pub aux_start: Tick,
    pub phy: Phy,
}

#[derive(Debug, Clone, Default)]
pub struct CreateSyncCtrl {
    pub state: EstablishState,
    /// A host request is outstanding
    pub pending: bool,
    pub params: Option<CreateSyncParams>,
    pub ctx: Option<contracts::SyncHandle>,
    pub start_request: Option<SyncCandidate>,
}

/// Everything needed to bring up a context, however the schedule was learned.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncPlan {
    pub identity: AdvIdentity,
    pub created_via: CreatedVia,
    pub phy: Phy,
    pub sync_info: SyncInfo,
    pub first_anchor: Anchor,
    pub base_widening_usec: u32,
    pub skip: u16,
    pub sync_timeout_usec: u32,
    pub reporting_disabled: bool,
    pub uses_adv_list: bool,
}

impl<P: Platform> LinkLayer<P> {
    /// Allocate and populate a context from `plan` and schedule its first reception.
    ///
    /// Nothing is left allocated when scheduling fails.
    pub(crate) fn begin_sync(
        &mut self,
        plan: SyncPlan,
    ) -> Result<contracts::SyncHandle, LinkLayerError> {
        let handle = self.allocate_context()?;
        let now = self.platform.scheduler().now();
        let Some(ctx) = self.pool.get_mut(handle) else {
            return Err(LinkLayerError::UnknownSyncHandle(handle));
        };
        let info = plan.sync_info;

        ctx.identity = plan.identity;
        ctx.created_via = plan.created_via;
        ctx.phy = plan.phy;
        ctx.advertiser_sca = info.sca;
        ctx.access_address = info.access_address;
        ctx.crc_init = info.crc_init;
        ctx.interval_usec = info.interval_usec();
        ctx.anchor = plan.first_anchor;
        ctx.next = plan.first_anchor;
        ctx.base_widening_usec = plan.base_widening_usec;
        ctx.skip = plan.skip;
        ctx.reporting_disabled = plan.reporting_disabled;
        ctx.chan_sel = crate::chan_sel::ChannelSelection::new(info.access_address, info.channel_map);
        ctx.sup_timeout_usec = plan.sync_timeout_usec;
        ctx.sup_deadline = now.wrapping_add(plan.sync_timeout_usec);
        let timer = ctx.sup_timer;
        if plan.uses_adv_list {
            ctx.holds_list_ref = true;
            self.adv_list.acquire();
        }

        self.platform.timers().arm(timer, plan.sync_timeout_usec);

        if let Err(err) = self.schedule_sync_op(handle, plan.first_anchor) {
            self.release_context(handle);
            return Err(err);
        }
        debug!(
            %handle,
            identity = %plan.identity,
            counter = plan.first_anchor.event_counter,
            "First periodic reception scheduled"
        );
        Ok(handle)
    }

    /// Common teardown request for an establishing context.
    pub(crate) fn abandon_establishing(
        &mut self,
        handle: Option<contracts::SyncHandle>,
        reason: CancelReason,
    ) {
        let Some(handle) = handle else {
            return;
        };
        if let Some(ctx) = self.pool.get_mut(handle) {
            ctx.cancel = Some(reason);
        }
        self.request_op_removal(handle);
    }

    pub(crate) fn run_create_action(
        &mut self,
        action: EstablishAction,
    ) -> Result<(), LinkLayerError> {
        match action {
            EstablishAction::Start => self.create_start(),
            EstablishAction::RejectStart => {
                warn!("Create-sync already discovering, candidate ignored");
                self.create.start_request = None;
                Ok(())
            }
            EstablishAction::Cancel => {
                self.abandon_establishing(self.create.ctx, CancelReason::ByHost);
                Ok(())
            }
            EstablishAction::Fail => {
                self.abandon_establishing(self.create.ctx, CancelReason::InternalFailure);
                Ok(())
            }
            EstablishAction::Done => {
                debug!(handle = ?self.create.ctx, "Create-sync handed over");
                self.create.ctx = None;
                self.create.pending = false;
                self.create.params = None;
                Ok(())
            }
            EstablishAction::Terminate => {
                self.create_terminate();
                Ok(())
            }
            EstablishAction::ResetShutdown => {
                if let Some(handle) = self.create.ctx {
                    self.request_op_removal(handle);
                }
                Ok(())
            }
            EstablishAction::ResetTerminate => {
                if let Some(handle) = self.create.ctx.take() {
                    self.release_context(handle);
                }
                self.create.pending = false;
                self.create.params = None;
                Ok(())
            }
        }
    }

    fn create_start(&mut self) -> Result<(), LinkLayerError> {
        let candidate = self
            .create
            .start_request
            .take()
            .ok_or_else(|| LinkLayerError::disallowed("no sync candidate"))?;
        let params = self
            .create
            .params
            .ok_or_else(|| LinkLayerError::disallowed("no create-sync request"))?;

        let info = candidate.sync_info;
        let offset_usec = info.offset.to_usec();
        let peer_ppm = info.sca.ppm() as u32;
        let local_ppm = self.config.local_clock_accuracy_ppm as u32;
        let plan = SyncPlan {
            identity: candidate.identity,
            created_via: CreatedVia::DirectScan,
            phy: candidate.phy,
            sync_info: info,
            first_anchor: Anchor::new(
                candidate.aux_start.wrapping_add(offset_usec),
                info.event_counter,
            ),
            base_widening_usec: info.offset.units.usec()
                + window_widening(offset_usec, local_ppm + peer_ppm),
            skip: params.skip,
            sync_timeout_usec: params.sync_timeout_usec(),
            reporting_disabled: params.reporting_disabled,
            uses_adv_list: params.filter_policy == FilterPolicy::UseAdvList,
        };

        let handle = self.begin_sync(plan)?;
        self.create.ctx = Some(handle);
        info!(%handle, identity = %candidate.identity, "Create-sync discovering");
        Ok(())
    }

    fn create_terminate(&mut self) {
        let Some(handle) = self.create.ctx.take() else {
            return;
        };
        let report = self.pool.get(handle).map(|ctx| match ctx.cancel {
            Some(CancelReason::ByHost) | None => {
                contracts::SyncEstablishedReport::zeroed(HciStatus::OperationCancelledByHost)
            }
            Some(CancelReason::InternalFailure) => {
                ctx.established_report(HciStatus::ConnectionFailedToEstablish)
            }
        });
        self.release_context(handle);
        self.create.pending = false;
        self.create.params = None;

        if let Some(report) = report {
            info!(%handle, status = ?report.status, "Create-sync ended without sync");
            self.platform.host().deliver(HostEvent::SyncEstablished(report));
        }
    }

    /// Scan found an advertisement carrying SyncInfo.
    pub(crate) fn offer_sync_candidate(&mut self, candidate: SyncCandidate) {
        if !self.create.pending || self.create.state != EstablishState::Disabled {
            return;
        }
        let Some(params) = self.create.params else {
            return;
        };
        if !params.matches(&candidate.identity, &self.adv_list) {
            return;
        }
        if self.pool.find_by_identity(&candidate.identity).is_some() {
            debug!(identity = %candidate.identity, "Candidate already synchronized");
            return;
        }
        if let Err(err) = candidate.sync_info.validate() {
            debug!(identity = %candidate.identity, error = %err, "Candidate SyncInfo rejected");
            return;
        }

        self.create.start_request = Some(candidate);
        if let Err(err) = self.execute_establish(Machine::Create, EstablishEvent::Start) {
            // the next advertisement from the target retries
            self.create.start_request = None;
            debug!(error = %err, "Create-sync start deferred");
        }
    }

    /// Host request to synchronize with a periodic train.
    #[instrument(level = "debug", name = "create_sync", skip(self))]
    pub fn create_sync(&mut self, params: CreateSyncParams) -> Result<(), LinkLayerError> {
        params.validate()?;
        if self.create.pending {
            return Err(LinkLayerError::disallowed("create-sync already pending"));
        }
        if !self.pool.has_free_slot() {
            return Err(LinkLayerError::PoolExhausted {
                capacity: self.pool.capacity(),
            });
        }
        if params.filter_policy == FilterPolicy::UseParams {
            let identity = params.identity();
            if self.pool.find_by_identity(&identity).is_some() {
                return Err(LinkLayerError::SyncAlreadyExists { identity });
            }
        }

        self.create.pending = true;
        self.create.params = Some(params);
        info!(policy = ?params.filter_policy, "Create-sync pending");
        Ok(())
    }

    /// Host cancel of the pending create-sync.
    #[instrument(level = "debug", name = "create_sync_cancel", skip(self))]
    pub fn create_sync_cancel(&mut self) -> Result<(), LinkLayerError> {
        if !self.create.pending {
            return Err(LinkLayerError::disallowed("no create-sync pending"));
        }
        match self.create.state {
            EstablishState::Disabled => {
                self.create.pending = false;
                self.create.params = None;
                self.platform
                    .host()
                    .deliver(HostEvent::SyncEstablished(
                        contracts::SyncEstablishedReport::zeroed(
                            HciStatus::OperationCancelledByHost,
                        ),
                    ));
            }
            EstablishState::Discovering => {
                self.execute_establish(Machine::Create, EstablishEvent::Cancel)?;
            }
            EstablishState::ShuttingDown | EstablishState::Resetting => {
                return Err(LinkLayerError::disallowed("create-sync already ending"));
            }
        }
        self.drain();
        Ok(())
    }
}
