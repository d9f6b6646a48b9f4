//! # Sync Engine
//!
//! 周期广播同步引擎（主机侧链路层）。
//!
//! 负责：
//! - 扩展扫描发现周期广播列车
//! - 通过直接扫描或 PAST 建立同步
//! - 锚点预测、窗口扩展与冲突仲裁
//! - 监督超时与同步丢失上报
//!
//! ## 使用示例
//!
//! ```ignore
//! use sync_engine::{CreateSyncParams, LinkLayer, LlMessage};
//!
//! let mut ll = LinkLayer::new(config, platform);
//! ll.set_ext_scan_enable(true, 0, 0)?;
//! ll.create_sync(CreateSyncParams { sid: 1, addr, sync_timeout_10ms: 100, ..Default::default() })?;
//!
//! // Feed radio, timer and connection-layer messages as they arrive
//! ll.dispatch(LlMessage::Radio(event));
//! ```

mod acad;
mod adv_list;
mod chan_sel;
mod commands;
mod conflict;
mod context;
mod create_sync;
mod engine;
mod establish;
mod event;
mod ext_scan;
mod per_scan;
mod pool;
mod transfer_sync;

pub mod mock;

pub use acad::{parse_acad, AcadId, AcadParams, AcadState, AcadTable, AD_TYPE_CHANNEL_MAP_UPDATE};
pub use adv_list::PeriodicAdvList;
pub use chan_sel::ChannelSelection;
pub use conflict::{resolve as resolve_conflict, ConflictPolicy};
pub use context::{CancelReason, CreatedVia, PeriodicSyncContext, MAX_REPORT_LEN};
pub use create_sync::{CreateSyncCtrl, CreateSyncParams, FilterPolicy, SyncCandidate};
pub use engine::LinkLayer;
pub use establish::{EstablishAction, EstablishEvent, EstablishState};
pub use event::{ConnEventRef, LlMessage, RadioEvent, RxPacket, SyncTransferMsg};
pub use ext_scan::{
    ExtScanAction, ExtScanContext, ExtScanEvent, ExtScanState, ReportAssembly, ReportOrigin,
    ScanBackoff, ADV_ACCESS_ADDRESS, ADV_CRC_INIT, BACKOFF_MAX,
};
pub use per_scan::{PerScanAction, PerScanEvent, PerScanState};
pub use pool::SyncContextPool;
pub use transfer_sync::{PendingTransfer, TransferSyncCtrl, TransferTiming};
