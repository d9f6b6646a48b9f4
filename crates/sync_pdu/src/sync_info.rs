//! SyncInfo record.

use bytes::{Buf, BufMut};
use contracts::Sca;
use timing::{interval_to_usec, SyncOffset};

use crate::{ChannelMap, PduError};

pub const SYNC_INFO_LEN: usize = 18;

/// Smallest periodic advertising interval (7.5 ms) in 1.25 ms units.
pub const MIN_PERIODIC_INTERVAL: u16 = 6;

/// Schedule of a periodic advertising train relative to the packet carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInfo {
    /// Start of the referenced train event relative to the carrying packet
    pub offset: SyncOffset,
    /// Interval in 1.25 ms units
    pub interval: u16,
    pub channel_map: ChannelMap,
    /// Advertiser's sleep clock accuracy
    pub sca: Sca,
    pub access_address: u32,
    pub crc_init: u32,
    pub event_counter: u16,
}

impl SyncInfo {
    pub fn interval_usec(&self) -> u32 {
        interval_to_usec(self.interval)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.offset.to_bits());
        buf.put_u16_le(self.interval);
        let mut chm = self.channel_map.to_bytes();
        chm[4] |= self.sca.index() << 5;
        buf.put_slice(&chm);
        buf.put_u32_le(self.access_address);
        buf.put_uint_le(self.crc_init as u64 & 0x00FF_FFFF, 3);
        buf.put_u16_le(self.event_counter);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, PduError> {
        PduError::check_len(SYNC_INFO_LEN, buf.remaining())?;

        let offset = SyncOffset::from_bits(buf.get_u16_le());
        let interval = buf.get_u16_le();
        let mut chm = [0u8; 5];
        buf.copy_to_slice(&mut chm);
        let sca = Sca::from_bits(chm[4] >> 5);
        let access_address = buf.get_u32_le();
        let crc_init = buf.get_uint_le(3) as u32;
        let event_counter = buf.get_u16_le();

        Ok(Self {
            offset,
            interval,
            channel_map: ChannelMap::from_bytes(chm),
            sca,
            access_address,
            crc_init,
            event_counter,
        })
    }

    /// Reject schedules that cannot be followed.
    pub fn validate(&self) -> Result<(), PduError> {
        if self.interval < MIN_PERIODIC_INTERVAL {
            return Err(PduError::InvalidInterval(self.interval));
        }
        if !self.channel_map.is_valid() {
            return Err(PduError::InvalidChannelMap {
                used: self.channel_map.used_count(),
            });
        }
        Ok(())
    }
}
