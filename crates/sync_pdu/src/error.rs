//! Codec errors.

use contracts::{AdvIdentity, LinkLayerError};
use thiserror::Error;
use timing::TimingError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    #[error("truncated pdu: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unexpected opcode {0:#04x}")]
    UnexpectedOpcode(u8),

    #[error("phy field {0:#04x} does not name exactly one phy")]
    InvalidPhy(u8),

    #[error("channel map uses {used} channels, need at least 2")]
    InvalidChannelMap { used: u8 },

    #[error("periodic interval {0} below minimum")]
    InvalidInterval(u16),

    #[error("train {0} already synchronized")]
    AlreadySynced(AdvIdentity),

    #[error("extended header length {0} exceeds payload")]
    BadExtHeader(usize),

    #[error(transparent)]
    Offset(#[from] TimingError),
}

impl PduError {
    pub(crate) fn check_len(expected: usize, actual: usize) -> Result<(), PduError> {
        if actual < expected {
            return Err(PduError::Truncated { expected, actual });
        }
        Ok(())
    }
}

impl From<PduError> for LinkLayerError {
    fn from(err: PduError) -> Self {
        match err {
            PduError::AlreadySynced(identity) => LinkLayerError::SyncAlreadyExists { identity },
            other => LinkLayerError::Pdu {
                message: other.to_string(),
            },
        }
    }
}
