//! # Contracts
//!
//! Frozen interface contracts shared by every link-layer crate: addressing,
//! PHY and clock-accuracy types, host event records, the collaborator traits
//! the sync engine drives (radio scheduler, baseband, timers, host
//! notification) and the unified error type.
//!
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Radio time is a free-running microsecond counter ([`Tick`]) that wraps at 2^32
//! - Tick ordering always uses signed wrapping differences, never `<` on raw values

mod address;
mod config;
mod error;
mod host;
mod host_event;
mod phy;
mod platform;
mod radio;
mod sync_handle;
mod timer;

pub use address::*;
pub use config::*;
pub use error::*;
pub use host::HostNotifier;
pub use host_event::*;
pub use phy::*;
pub use platform::Platform;
pub use radio::*;
pub use sync_handle::SyncHandle;
pub use timer::*;
