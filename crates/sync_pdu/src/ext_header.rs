//! Common extended advertising payload.
//!
//! Layout after the 2-byte PDU header: one byte of {ext header length:6,
//! AdvMode:2}, then the extended header (flags byte and the flagged fields
//! in fixed order, ACAD filling the remainder), then AdvData.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{AddrType, BdAddr, Phy};

use crate::{PduError, SyncInfo, SYNC_INFO_LEN};

/// PDU type shared by ADV_EXT_IND, AUX_ADV_IND, AUX_SYNC_IND and AUX_CHAIN_IND.
pub const ADV_EXT_IND: u8 = 0x07;

const FLAG_ADV_A: u8 = 1 << 0;
const FLAG_TARGET_A: u8 = 1 << 1;
const FLAG_CTE_INFO: u8 = 1 << 2;
const FLAG_ADI: u8 = 1 << 3;
const FLAG_AUX_PTR: u8 = 1 << 4;
const FLAG_SYNC_INFO: u8 = 1 << 5;
const FLAG_TX_POWER: u8 = 1 << 6;

/// Advertising data info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adi {
    pub did: u16,
    pub sid: u8,
}

/// Pointer to the next packet of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxPtr {
    pub channel: u8,
    pub offset_usec: u32,
    pub phy: Option<Phy>,
}

impl AuxPtr {
    fn decode(raw: [u8; 3]) -> Self {
        let unit = if raw[0] & 0x80 != 0 { 300 } else { 30 };
        let word = u16::from_le_bytes([raw[1], raw[2]]);
        let phy = match word >> 13 {
            0 => Some(Phy::Le1M),
            1 => Some(Phy::Le2M),
            2 => Some(Phy::LeCoded),
            _ => None,
        };
        Self {
            channel: raw[0] & 0x3F,
            offset_usec: (word & 0x1FFF) as u32 * unit,
            phy,
        }
    }

    fn encode(&self) -> [u8; 3] {
        let (units_bit, value) = if self.offset_usec >= 245_700 {
            (0x80, self.offset_usec / 300)
        } else {
            (0x00, self.offset_usec / 30)
        };
        let phy = match self.phy {
            Some(Phy::Le2M) => 1,
            Some(Phy::LeCoded) => 2,
            _ => 0,
        };
        let word = (value as u16 & 0x1FFF) | (phy << 13);
        let [lo, hi] = word.to_le_bytes();
        [(self.channel & 0x3F) | units_bit, lo, hi]
    }
}

/// Decoded extended advertising PDU.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtAdvPdu {
    pub tx_add: bool,
    pub adv_mode: u8,
    pub adv_addr: Option<BdAddr>,
    pub target_addr: Option<BdAddr>,
    pub adi: Option<Adi>,
    pub aux_ptr: Option<AuxPtr>,
    pub sync_info: Option<SyncInfo>,
    pub tx_power: Option<i8>,
    pub acad: Bytes,
    pub adv_data: Bytes,
}

impl ExtAdvPdu {
    pub fn addr_type(&self) -> AddrType {
        AddrType::from_bit(self.tx_add)
    }

    pub fn sid(&self) -> Option<u8> {
        self.adi.map(|adi| adi.sid)
    }

    /// Decode a PDU including its 2-byte header.
    pub fn decode(mut pdu: Bytes) -> Result<Self, PduError> {
        PduError::check_len(3, pdu.len())?;
        let header = pdu.get_u8();
        let length = pdu.get_u8() as usize;
        if header & 0x0F != ADV_EXT_IND {
            return Err(PduError::UnexpectedOpcode(header & 0x0F));
        }
        PduError::check_len(length, pdu.len())?;
        let mut payload = pdu.split_to(length);
        if payload.is_empty() {
            return Err(PduError::Truncated {
                expected: 1,
                actual: 0,
            });
        }

        let first = payload.get_u8();
        let ext_len = (first & 0x3F) as usize;
        if ext_len > payload.len() {
            return Err(PduError::BadExtHeader(ext_len));
        }
        let mut ext = payload.split_to(ext_len);
        let mut out = Self {
            tx_add: header & 0x40 != 0,
            adv_mode: first >> 6,
            adv_data: payload,
            ..Default::default()
        };
        if ext.is_empty() {
            return Ok(out);
        }

        let flags = ext.get_u8();
        if flags & FLAG_ADV_A != 0 {
            out.adv_addr = Some(take_addr(&mut ext, ext_len)?);
        }
        if flags & FLAG_TARGET_A != 0 {
            out.target_addr = Some(take_addr(&mut ext, ext_len)?);
        }
        if flags & FLAG_CTE_INFO != 0 {
            take(&mut ext, 1, ext_len)?;
        }
        if flags & FLAG_ADI != 0 {
            let word = take(&mut ext, 2, ext_len)?.get_u16_le();
            out.adi = Some(Adi {
                did: word & 0x0FFF,
                sid: (word >> 12) as u8,
            });
        }
        if flags & FLAG_AUX_PTR != 0 {
            let mut raw = [0u8; 3];
            take(&mut ext, 3, ext_len)?.copy_to_slice(&mut raw);
            out.aux_ptr = Some(AuxPtr::decode(raw));
        }
        if flags & FLAG_SYNC_INFO != 0 {
            let mut raw = take(&mut ext, SYNC_INFO_LEN, ext_len)?;
            out.sync_info = Some(SyncInfo::decode(&mut raw)?);
        }
        if flags & FLAG_TX_POWER != 0 {
            out.tx_power = Some(take(&mut ext, 1, ext_len)?.get_i8());
        }
        out.acad = ext;
        Ok(out)
    }

    /// Encode with the 2-byte PDU header.
    pub fn encode(&self) -> Bytes {
        let mut ext = BytesMut::new();
        let mut flags = 0u8;
        if let Some(addr) = &self.adv_addr {
            flags |= FLAG_ADV_A;
            ext.put_slice(addr.as_bytes());
        }
        if let Some(addr) = &self.target_addr {
            flags |= FLAG_TARGET_A;
            ext.put_slice(addr.as_bytes());
        }
        if let Some(adi) = &self.adi {
            flags |= FLAG_ADI;
            ext.put_u16_le((adi.did & 0x0FFF) | ((adi.sid as u16 & 0x0F) << 12));
        }
        if let Some(aux) = &self.aux_ptr {
            flags |= FLAG_AUX_PTR;
            ext.put_slice(&aux.encode());
        }
        if let Some(info) = &self.sync_info {
            flags |= FLAG_SYNC_INFO;
            info.encode(&mut ext);
        }
        if let Some(power) = self.tx_power {
            flags |= FLAG_TX_POWER;
            ext.put_i8(power);
        }
        ext.put_slice(&self.acad);

        let ext_len = if flags == 0 && self.acad.is_empty() {
            0
        } else {
            ext.len() + 1
        };
        let length = 1 + ext_len + self.adv_data.len();

        let mut buf = BytesMut::with_capacity(2 + length);
        buf.put_u8(ADV_EXT_IND | if self.tx_add { 0x40 } else { 0 });
        buf.put_u8(length as u8);
        buf.put_u8((ext_len as u8 & 0x3F) | (self.adv_mode << 6));
        if ext_len > 0 {
            buf.put_u8(flags);
            buf.put_slice(&ext);
        }
        buf.put_slice(&self.adv_data);
        buf.freeze()
    }
}

fn take(ext: &mut Bytes, len: usize, ext_len: usize) -> Result<Bytes, PduError> {
    if ext.len() < len {
        return Err(PduError::BadExtHeader(ext_len));
    }
    Ok(ext.split_to(len))
}

fn take_addr(ext: &mut Bytes, ext_len: usize) -> Result<BdAddr, PduError> {
    let mut addr = [0u8; 6];
    take(ext, 6, ext_len)?.copy_to_slice(&mut addr);
    Ok(BdAddr::new(addr))
}
