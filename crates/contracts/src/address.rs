//! Device address and advertising identity types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 48-bit Bluetooth device address, stored little-endian as on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from the low 48 bits of `value`.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&value.to_le_bytes()[..6]);
        Self(bytes)
    }

    pub fn to_u64(self) -> u64 {
        let mut wide = [0u8; 8];
        wide[..6].copy_from_slice(&self.0);
        u64::from_le_bytes(wide)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Advertiser address type (TxAdd / AType bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrType {
    #[default]
    Public,
    Random,
}

impl AddrType {
    pub fn from_bit(random: bool) -> Self {
        if random {
            Self::Random
        } else {
            Self::Public
        }
    }

    pub fn is_random(self) -> bool {
        matches!(self, Self::Random)
    }
}

/// Identity of one periodic advertising train: address, address type and SID.
///
/// Two trains with the same identity are the same train; this is the key
/// used for duplicate-sync suppression and advertiser-list filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AdvIdentity {
    pub addr: BdAddr,
    pub addr_type: AddrType,
    /// Advertising set identifier (0..=0x0F)
    pub sid: u8,
}

impl AdvIdentity {
    pub fn new(addr: BdAddr, addr_type: AddrType, sid: u8) -> Self {
        Self {
            addr,
            addr_type,
            sid,
        }
    }
}

impl fmt::Display for AdvIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.addr_type {
            AddrType::Public => "public",
            AddrType::Random => "random",
        };
        write!(f, "{}/{}/sid={}", self.addr, kind, self.sid)
    }
}
