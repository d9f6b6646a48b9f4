//! Fixed-size periodic sync context pool.

use bytes::BytesMut;
use contracts::{AdvIdentity, SyncHandle};

use crate::context::{PeriodicSyncContext, MAX_REPORT_LEN};

/// Slot table; a slot's index is its [`SyncHandle`].
#[derive(Debug)]
pub struct SyncContextPool {
    slots: Vec<PeriodicSyncContext>,
}

impl SyncContextPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|index| PeriodicSyncContext::vacant(SyncHandle::from_index(index)))
            .collect();
        Self { slots }
    }

    /// Claim the first free slot, zeroed and enabled.
    pub fn allocate(&mut self) -> Option<SyncHandle> {
        let index = self.slots.iter().position(|slot| !slot.enabled)?;
        let handle = SyncHandle::from_index(index);
        let mut report_buf = std::mem::take(&mut self.slots[index].report_buf);
        report_buf.clear();
        if report_buf.capacity() < MAX_REPORT_LEN {
            report_buf = BytesMut::with_capacity(MAX_REPORT_LEN);
        }

        let slot = &mut self.slots[index];
        *slot = PeriodicSyncContext::vacant(handle);
        slot.enabled = true;
        slot.report_buf = report_buf;
        Some(handle)
    }

    /// Return a slot. Fields stay readable until the slot is reallocated.
    pub fn release(&mut self, handle: SyncHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index()) {
            slot.enabled = false;
        }
    }

    pub fn get(&self, handle: SyncHandle) -> Option<&PeriodicSyncContext> {
        self.slots.get(handle.index()).filter(|slot| slot.enabled)
    }

    pub fn get_mut(&mut self, handle: SyncHandle) -> Option<&mut PeriodicSyncContext> {
        self.slots.get_mut(handle.index()).filter(|slot| slot.enabled)
    }

    /// Slot for `handle` whether or not it is enabled.
    ///
    /// # Panics
    /// When `handle` is outside the pool.
    pub fn resolve(&self, handle: SyncHandle) -> &PeriodicSyncContext {
        &self.slots[handle.index()]
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.enabled).count()
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(|slot| !slot.enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_count() == 0
    }

    /// Enabled context tracking `identity`.
    pub fn find_by_identity(&self, identity: &AdvIdentity) -> Option<SyncHandle> {
        self.slots
            .iter()
            .find(|slot| slot.enabled && slot.identity == *identity)
            .map(|slot| slot.handle)
    }

    pub fn handles(&self) -> Vec<SyncHandle> {
        self.slots
            .iter()
            .filter(|slot| slot.enabled)
            .map(|slot| slot.handle)
            .collect()
    }
}
