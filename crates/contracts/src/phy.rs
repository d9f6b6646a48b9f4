//! PHY selection and sleep clock accuracy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// LE physical layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phy {
    Le1M,
    Le2M,
    LeCoded,
}

impl Phy {
    /// Bit used in PHY bitmask fields (`LL_PERIODIC_SYNC_IND`, HCI).
    pub fn bit(self) -> u8 {
        match self {
            Self::Le1M => 0x01,
            Self::Le2M => 0x02,
            Self::LeCoded => 0x04,
        }
    }

    /// Decode a bitmask carrying exactly one PHY.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x01 => Some(Self::Le1M),
            0x02 => Some(Self::Le2M),
            0x04 => Some(Self::LeCoded),
            _ => None,
        }
    }

    /// PHY value as reported in HCI events (1, 2, 3).
    pub fn hci_value(self) -> u8 {
        match self {
            Self::Le1M => 1,
            Self::Le2M => 2,
            Self::LeCoded => 3,
        }
    }
}

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Le1M => "1M",
            Self::Le2M => "2M",
            Self::LeCoded => "coded",
        };
        f.write_str(name)
    }
}

/// Worst-case ppm for each sleep clock accuracy index.
pub const SCA_PPM: [u16; 8] = [500, 250, 150, 100, 75, 50, 30, 20];

/// Sleep clock accuracy index (0..=7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sca(u8);

impl Sca {
    pub fn new(index: u8) -> Option<Self> {
        (index < 8).then_some(Self(index))
    }

    /// Take the low three bits of a packed field.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn ppm(self) -> u16 {
        SCA_PPM[self.0 as usize]
    }

    /// Tightest index whose bound still covers `ppm`.
    ///
    /// Accuracies worse than 500 ppm saturate at index 0.
    pub fn from_ppm(ppm: u16) -> Self {
        let index = SCA_PPM.iter().rposition(|&bound| bound >= ppm).unwrap_or(0);
        Self(index as u8)
    }
}
