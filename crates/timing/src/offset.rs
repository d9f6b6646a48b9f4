//! SyncInfo offset codec.
//!
//! The 16-bit field packs a 13-bit magnitude, a units bit (30 us or 300 us)
//! and an adjust bit that adds 2.4576 s to coarse offsets. Bit 15 is RFU.

use crate::TimingError;

pub const OFFSET_MAX_VALUE: u16 = 0x1FFF;
pub const OFFSET_COARSE_THRESHOLD_USEC: u32 = 245_700;
pub const OFFSET_ADJUST_USEC: u32 = 2_457_600;

const UNITS_BIT: u16 = 1 << 13;
const ADJUST_BIT: u16 = 1 << 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnits {
    Fine30,
    Coarse300,
}

impl OffsetUnits {
    pub fn usec(self) -> u32 {
        match self {
            Self::Fine30 => 30,
            Self::Coarse300 => 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOffset {
    pub value: u16,
    pub units: OffsetUnits,
    pub adjust: bool,
}

impl SyncOffset {
    /// Largest encodable offset.
    pub const MAX_USEC: u32 = OFFSET_ADJUST_USEC + OFFSET_MAX_VALUE as u32 * 300;

    /// Encode, rounding down to the chosen unit.
    pub fn from_usec(usec: u32) -> Result<Self, TimingError> {
        let (units, adjust, base) = if usec < OFFSET_COARSE_THRESHOLD_USEC {
            (OffsetUnits::Fine30, false, usec)
        } else if usec < OFFSET_ADJUST_USEC {
            (OffsetUnits::Coarse300, false, usec)
        } else {
            (OffsetUnits::Coarse300, true, usec - OFFSET_ADJUST_USEC)
        };

        let value = base / units.usec();
        if value > OFFSET_MAX_VALUE as u32 {
            return Err(TimingError::OffsetOutOfRange { usec });
        }
        Ok(Self {
            value: value as u16,
            units,
            adjust,
        })
    }

    pub fn to_usec(self) -> u32 {
        let base = self.value as u32 * self.units.usec();
        if self.adjust {
            base + OFFSET_ADJUST_USEC
        } else {
            base
        }
    }

    pub fn to_bits(self) -> u16 {
        let mut bits = self.value & OFFSET_MAX_VALUE;
        if self.units == OffsetUnits::Coarse300 {
            bits |= UNITS_BIT;
        }
        if self.adjust {
            bits |= ADJUST_BIT;
        }
        bits
    }

    /// Decode; the RFU bit is ignored.
    pub fn from_bits(bits: u16) -> Self {
        Self {
            value: bits & OFFSET_MAX_VALUE,
            units: if bits & UNITS_BIT != 0 {
                OffsetUnits::Coarse300
            } else {
                OffsetUnits::Fine30
            },
            adjust: bits & ADJUST_BIT != 0,
        }
    }
}
