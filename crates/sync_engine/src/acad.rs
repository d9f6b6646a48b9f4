//! Additional controller advertising data (ACAD) sub-procedures.

use sync_pdu::ChannelMap;
use timing::event_counter_reached;

/// AD type of the channel map update indication.
pub const AD_TYPE_CHANNEL_MAP_UPDATE: u8 = 0x28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcadId {
    ChannelMapUpdate,
}

impl AcadId {
    const COUNT: usize = 1;

    fn slot(self) -> usize {
        match self {
            Self::ChannelMapUpdate => 0,
        }
    }
}

/// Parameters of one pending sub-procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcadParams {
    ChannelMapUpdate { channel_map: ChannelMap, instant: u16 },
}

impl AcadParams {
    pub fn id(&self) -> AcadId {
        match self {
            Self::ChannelMapUpdate { .. } => AcadId::ChannelMapUpdate,
        }
    }

    pub fn instant(&self) -> u16 {
        match self {
            Self::ChannelMapUpdate { instant, .. } => *instant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcadState {
    #[default]
    Disabled,
    Enabled(AcadParams),
}

/// One slot per sub-procedure kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AcadTable {
    slots: [AcadState; AcadId::COUNT],
}

impl AcadTable {
    /// Enable the sub-procedure unless one of its kind is already pending
    /// or its instant is not after `current`.
    pub fn ingest(&mut self, params: AcadParams, current: u16) -> bool {
        let slot = &mut self.slots[params.id().slot()];
        if *slot != AcadState::Disabled || event_counter_reached(current, params.instant()) {
            return false;
        }
        *slot = AcadState::Enabled(params);
        true
    }

    /// Disable and return every sub-procedure whose instant `counter` has reached.
    pub fn take_due(&mut self, counter: u16) -> Vec<AcadParams> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            if let AcadState::Enabled(params) = *slot {
                if event_counter_reached(counter, params.instant()) {
                    *slot = AcadState::Disabled;
                    due.push(params);
                }
            }
        }
        due
    }

    pub fn state(&self, id: AcadId) -> AcadState {
        self.slots[id.slot()]
    }
}

/// Extract known sub-procedures from ACAD AD structures.
///
/// Unknown AD types are skipped; parsing stops at the first malformed structure.
pub fn parse_acad(mut acad: &[u8]) -> Vec<AcadParams> {
    let mut found = Vec::new();
    while let Some((&len, rest)) = acad.split_first() {
        let len = len as usize;
        if len == 0 || rest.len() < len {
            break;
        }
        let (structure, tail) = rest.split_at(len);
        acad = tail;

        if structure[0] == AD_TYPE_CHANNEL_MAP_UPDATE && structure.len() == 8 {
            let mut chm = [0u8; 5];
            chm.copy_from_slice(&structure[1..6]);
            found.push(AcadParams::ChannelMapUpdate {
                channel_map: ChannelMap::from_bytes(chm),
                instant: u16::from_le_bytes([structure[6], structure[7]]),
            });
        }
    }
    found
}
