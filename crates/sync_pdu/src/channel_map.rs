//! Data channel map.

pub const DATA_CHANNEL_COUNT: u8 = 37;

const CHANNEL_MASK: u64 = (1 << DATA_CHANNEL_COUNT) - 1;

/// Bit `n` set means data channel `n` is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelMap(u64);

impl ChannelMap {
    pub const ALL: ChannelMap = ChannelMap(CHANNEL_MASK);

    /// Bits above channel 36 are dropped.
    pub fn from_bits(bits: u64) -> Self {
        Self(bits & CHANNEL_MASK)
    }

    /// Decode the 5-byte wire form; the top three bits of the last byte are not channels.
    pub fn from_bytes(bytes: [u8; 5]) -> Self {
        let mut wide = [0u8; 8];
        wide[..5].copy_from_slice(&bytes);
        Self::from_bits(u64::from_le_bytes(wide))
    }

    pub fn from_channels(channels: &[u8]) -> Self {
        let bits = channels
            .iter()
            .filter(|&&ch| ch < DATA_CHANNEL_COUNT)
            .fold(0u64, |acc, &ch| acc | 1 << ch);
        Self(bits)
    }

    pub fn to_bytes(self) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        bytes.copy_from_slice(&self.0.to_le_bytes()[..5]);
        bytes
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_used(self, channel: u8) -> bool {
        channel < DATA_CHANNEL_COUNT && self.0 & (1 << channel) != 0
    }

    pub fn used_count(self) -> u8 {
        self.0.count_ones() as u8
    }

    /// Used channels in ascending order.
    pub fn used_channels(self) -> Vec<u8> {
        (0..DATA_CHANNEL_COUNT).filter(|&ch| self.is_used(ch)).collect()
    }

    /// A usable map selects at least two channels.
    pub fn is_valid(self) -> bool {
        self.used_count() >= 2
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::ALL
    }
}
