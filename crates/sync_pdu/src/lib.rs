//! # Sync PDU
//!
//! Wire codecs for periodic advertising synchronization:
//!
//! - [`ChannelMap`]: 37-bit data channel map
//! - [`SyncInfo`]: the 18-byte schedule record carried in extended advertising headers
//! - [`PeriodicSyncInd`]: `LL_PERIODIC_SYNC_IND` control PDU used for sync transfer
//! - [`ExtAdvPdu`]: common extended advertising payload (AdvA, ADI, AuxPtr, SyncInfo, ACAD)
//!
//! All multi-byte fields are little-endian.

mod channel_map;
mod error;
mod ext_header;
mod sync_info;
mod sync_ind;

pub use channel_map::{ChannelMap, DATA_CHANNEL_COUNT};
pub use error::PduError;
pub use ext_header::{Adi, AuxPtr, ExtAdvPdu, ADV_EXT_IND};
pub use sync_info::{SyncInfo, MIN_PERIODIC_INTERVAL, SYNC_INFO_LEN};
pub use sync_ind::{PeriodicSyncInd, LL_PERIODIC_SYNC_IND, SYNC_IND_CTR_DATA_LEN};
