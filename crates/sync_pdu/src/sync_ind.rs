//! `LL_PERIODIC_SYNC_IND` control PDU.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{AddrType, AdvIdentity, BdAddr, Phy, Sca};

use crate::{PduError, SyncInfo, SYNC_INFO_LEN};

pub const LL_PERIODIC_SYNC_IND: u8 = 0x22;
pub const SYNC_IND_CTR_DATA_LEN: usize = 34;

/// Position of the {SID, AType, SCA} byte inside the control data.
const IDENTITY_OFFSET: usize = 2 + SYNC_INFO_LEN + 4;

/// Periodic sync transfer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicSyncInd {
    /// Service data supplied by the sender's host
    pub id: u16,
    pub sync_info: SyncInfo,
    /// Connection event the SyncInfo offset is measured from
    pub conn_event_count: u16,
    /// Train event counter of the last packet the sender received or sent
    pub last_pa_event_counter: u16,
    pub sid: u8,
    pub addr_type: AddrType,
    /// Sender's sleep clock accuracy
    pub sca: Sca,
    pub phy: Phy,
    pub adv_addr: BdAddr,
    /// Connection event the sender's reference was taken in
    pub sync_conn_event_count: u16,
}

impl PeriodicSyncInd {
    pub fn identity(&self) -> AdvIdentity {
        AdvIdentity::new(self.adv_addr, self.addr_type, self.sid)
    }

    /// Full PDU: opcode followed by control data.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + SYNC_IND_CTR_DATA_LEN);
        buf.put_u8(LL_PERIODIC_SYNC_IND);
        self.encode_ctr_data(&mut buf);
        buf.freeze()
    }

    pub fn encode_ctr_data(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.id);
        self.sync_info.encode(buf);
        buf.put_u16_le(self.conn_event_count);
        buf.put_u16_le(self.last_pa_event_counter);
        let packed =
            (self.sid & 0x0F) | (u8::from(self.addr_type.is_random()) << 4) | (self.sca.index() << 5);
        buf.put_u8(packed);
        buf.put_u8(self.phy.bit());
        buf.put_slice(self.adv_addr.as_bytes());
        buf.put_u16_le(self.sync_conn_event_count);
    }

    /// Decode a full PDU (opcode first).
    pub fn decode(pdu: &[u8]) -> Result<Self, PduError> {
        Self::decode_ctr_data(Self::strip_opcode(pdu)?)
    }

    /// Decode a full PDU, dropping it early when `is_tracked` already knows its train.
    pub fn decode_checked(
        pdu: &[u8],
        is_tracked: impl Fn(&AdvIdentity) -> bool,
    ) -> Result<Self, PduError> {
        let ctr = Self::strip_opcode(pdu)?;
        let identity = Self::peek_identity(ctr)?;
        if is_tracked(&identity) {
            return Err(PduError::AlreadySynced(identity));
        }
        Self::decode_ctr_data(ctr)
    }

    pub fn decode_ctr_data(mut ctr: &[u8]) -> Result<Self, PduError> {
        PduError::check_len(SYNC_IND_CTR_DATA_LEN, ctr.len())?;

        let id = ctr.get_u16_le();
        let sync_info = SyncInfo::decode(&mut ctr)?;
        let conn_event_count = ctr.get_u16_le();
        let last_pa_event_counter = ctr.get_u16_le();
        let packed = ctr.get_u8();
        let phy_bits = ctr.get_u8();
        let phy = Phy::from_bits(phy_bits).ok_or(PduError::InvalidPhy(phy_bits))?;
        let mut addr = [0u8; 6];
        ctr.copy_to_slice(&mut addr);
        let sync_conn_event_count = ctr.get_u16_le();

        sync_info.validate()?;

        Ok(Self {
            id,
            sync_info,
            conn_event_count,
            last_pa_event_counter,
            sid: packed & 0x0F,
            addr_type: AddrType::from_bit(packed & 0x10 != 0),
            sca: Sca::from_bits(packed >> 5),
            phy,
            adv_addr: BdAddr::new(addr),
            sync_conn_event_count,
        })
    }

    fn strip_opcode(pdu: &[u8]) -> Result<&[u8], PduError> {
        let (&opcode, ctr) = pdu.split_first().ok_or(PduError::Truncated {
            expected: 1 + SYNC_IND_CTR_DATA_LEN,
            actual: 0,
        })?;
        if opcode != LL_PERIODIC_SYNC_IND {
            return Err(PduError::UnexpectedOpcode(opcode));
        }
        Ok(ctr)
    }

    fn peek_identity(ctr: &[u8]) -> Result<AdvIdentity, PduError> {
        PduError::check_len(SYNC_IND_CTR_DATA_LEN, ctr.len())?;
        let packed = ctr[IDENTITY_OFFSET];
        let addr_start = IDENTITY_OFFSET + 2;
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&ctr[addr_start..addr_start + 6]);
        Ok(AdvIdentity::new(
            BdAddr::new(addr),
            AddrType::from_bit(packed & 0x10 != 0),
            packed & 0x0F,
        ))
    }
}
