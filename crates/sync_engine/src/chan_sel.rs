//! Channel Selection Algorithm #2 for periodic advertising events.

use sync_pdu::{ChannelMap, DATA_CHANNEL_COUNT};

/// Working state of CSA#2 for one train.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelection {
    channel_id: u16,
    map: ChannelMap,
    used: Vec<u8>,
}

impl ChannelSelection {
    pub fn new(access_address: u32, map: ChannelMap) -> Self {
        Self {
            channel_id: ((access_address >> 16) ^ (access_address & 0xFFFF)) as u16,
            map,
            used: map.used_channels(),
        }
    }

    /// Replace the map and rebuild the remapping table.
    pub fn set_map(&mut self, map: ChannelMap) {
        self.map = map;
        self.used = map.used_channels();
    }

    pub fn map(&self) -> ChannelMap {
        self.map
    }

    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// Data channel for the event with counter `event_counter`.
    pub fn channel_for(&self, event_counter: u16) -> u8 {
        let prn = prn_e(event_counter, self.channel_id);
        let unmapped = (prn % DATA_CHANNEL_COUNT as u16) as u8;
        if self.map.is_used(unmapped) {
            return unmapped;
        }
        let index = (self.used.len() as u32 * prn as u32) >> 16;
        self.used.get(index as usize).copied().unwrap_or(unmapped)
    }
}

impl Default for ChannelSelection {
    fn default() -> Self {
        Self::new(0, ChannelMap::ALL)
    }
}

/// Reverse the bit order within each byte.
fn perm(value: u16) -> u16 {
    let [lo, hi] = value.to_le_bytes();
    u16::from_le_bytes([lo.reverse_bits(), hi.reverse_bits()])
}

/// Multiply, add, modulo 2^16.
fn mam(a: u16, b: u16) -> u16 {
    (17u32 * a as u32 + b as u32) as u16
}

fn prn_e(counter: u16, channel_id: u16) -> u16 {
    let mut u = counter ^ channel_id;
    for _ in 0..3 {
        u = mam(perm(u), channel_id);
    }
    u ^ channel_id
}
