//! Host commands that span several machines.

use contracts::{AdvIdentity, LinkLayerError, Phy, Platform, SyncHandle, TimerId, TimerService};
use tracing::{info, instrument, warn};

use crate::create_sync::FilterPolicy;
use crate::engine::{LinkLayer, Machine, Steward};
use crate::establish::{EstablishEvent, EstablishState};
use crate::ext_scan::ExtScanEvent;
use crate::per_scan::{PerScanEvent, PerScanState};

impl<P: Platform> LinkLayer<P> {
    /// Stop tracking a sync, or cancel one being established from a transfer.
    #[instrument(level = "debug", name = "terminate_sync", skip(self))]
    pub fn terminate_sync(&mut self, handle: SyncHandle) -> Result<(), LinkLayerError> {
        let ctx = self
            .pool
            .get(handle)
            .ok_or(LinkLayerError::UnknownSyncHandle(handle))?;

        match self.steward(handle) {
            Steward::Create => {
                return Err(LinkLayerError::disallowed(
                    "sync still being created; cancel the create request",
                ));
            }
            Steward::Transfer => {
                if self.transfer.state != EstablishState::Discovering {
                    return Err(LinkLayerError::disallowed("transfer-sync already ending"));
                }
                self.execute_establish(Machine::Transfer, EstablishEvent::Cancel)?;
            }
            Steward::Tracking => {
                if ctx.state != PerScanState::SyncEstablished {
                    return Err(LinkLayerError::disallowed("sync already terminating"));
                }
                self.execute_per_scan(handle, PerScanEvent::Terminate);
            }
        }
        info!(%handle, "Sync termination requested");
        self.drain();
        Ok(())
    }

    pub fn add_to_periodic_adv_list(&mut self, identity: AdvIdentity) -> Result<(), LinkLayerError> {
        self.check_adv_list_writable()?;
        self.adv_list.add(identity)
    }

    pub fn remove_from_periodic_adv_list(
        &mut self,
        identity: &AdvIdentity,
    ) -> Result<(), LinkLayerError> {
        self.check_adv_list_writable()?;
        self.adv_list.remove(identity)
    }

    pub fn clear_periodic_adv_list(&mut self) -> Result<(), LinkLayerError> {
        self.check_adv_list_writable()?;
        self.adv_list.clear();
        Ok(())
    }

    pub fn periodic_adv_list_size(&self) -> usize {
        self.adv_list.capacity()
    }

    fn check_adv_list_writable(&self) -> Result<(), LinkLayerError> {
        let list_create_pending = self.create.pending
            && self
                .create
                .params
                .is_some_and(|params| params.filter_policy == FilterPolicy::UseAdvList);
        if list_create_pending || self.adv_list.in_use() {
            return Err(LinkLayerError::disallowed("periodic advertiser list in use"));
        }
        Ok(())
    }

    /// Abandon everything without host notifications.
    #[instrument(level = "info", name = "ll_reset", skip(self))]
    pub fn reset(&mut self) {
        let phys: Vec<Phy> = self.scanners.iter().map(|scanner| scanner.phy).collect();
        for phy in phys {
            self.platform.timers().disarm(TimerId::ScanDuration(phy));
            self.platform.timers().disarm(TimerId::ScanPeriod(phy));
            self.execute_ext_scan(phy, ExtScanEvent::Reset);
        }

        for machine in [Machine::Create, Machine::Transfer] {
            if let Err(err) = self.execute_establish(machine, EstablishEvent::Reset) {
                warn!(?machine, error = %err, "Establishing machine reset failed");
            }
        }
        for handle in self.pool.handles() {
            if self.steward(handle) == Steward::Tracking {
                self.execute_per_scan(handle, PerScanEvent::Reset);
            }
        }

        if self.create.state == EstablishState::Disabled {
            self.create.pending = false;
            self.create.params = None;
        }
        self.create.start_request = None;
        self.transfer.pending = None;
        self.adv_list.clear();
        self.past.clear();
        self.drain();
        info!("Link layer reset");
    }
}
