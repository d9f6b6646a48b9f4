//! Periodic advertiser list.

use contracts::{AdvIdentity, LinkLayerError};

/// Fixed-capacity list of trains a create-sync may target.
///
/// `users` counts live contexts that were created through the list; the
/// list cannot be modified while any exist.
#[derive(Debug)]
pub struct PeriodicAdvList {
    entries: Vec<AdvIdentity>,
    capacity: usize,
    users: usize,
}

impl PeriodicAdvList {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            users: 0,
        }
    }

    pub fn add(&mut self, identity: AdvIdentity) -> Result<(), LinkLayerError> {
        if self.contains(&identity) {
            return Err(LinkLayerError::invalid_param(
                "periodic_adv_list",
                format!("{identity} already listed"),
            ));
        }
        if self.entries.len() >= self.capacity {
            return Err(LinkLayerError::AdvListFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(identity);
        Ok(())
    }

    pub fn remove(&mut self, identity: &AdvIdentity) -> Result<(), LinkLayerError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry == identity)
            .ok_or(LinkLayerError::AdvListEntryMissing {
                identity: *identity,
            })?;
        self.entries.swap_remove(index);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, identity: &AdvIdentity) -> bool {
        self.entries.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn acquire(&mut self) {
        self.users += 1;
    }

    pub fn release(&mut self) {
        debug_assert!(self.users > 0, "advertiser list reference underflow");
        self.users = self.users.saturating_sub(1);
    }

    pub fn users(&self) -> usize {
        self.users
    }

    pub fn in_use(&self) -> bool {
        self.users > 0
    }
}
