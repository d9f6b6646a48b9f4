//! Layered error definitions
//!
//! Categorized by source: host command / resources / scheduling / codec / config

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AdvIdentity, ScheduleError, SyncHandle};

/// HCI status codes surfaced by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum HciStatus {
    #[default]
    Success = 0x00,
    UnknownConnectionIdentifier = 0x02,
    MemoryCapacityExceeded = 0x07,
    ConnectionAlreadyExists = 0x0B,
    CommandDisallowed = 0x0C,
    InvalidParameters = 0x12,
    ConnectionFailedToEstablish = 0x3E,
    UnknownAdvertisingIdentifier = 0x42,
    OperationCancelledByHost = 0x44,
}

impl HciStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum LinkLayerError {
    // ===== Host Command Errors =====
    /// Parameter outside its permitted range
    #[error("invalid parameter '{field}': {message}")]
    InvalidParameters { field: String, message: String },

    /// Command not allowed in the current state
    #[error("command disallowed: {reason}")]
    CommandDisallowed { reason: String },

    /// Handle does not name a live sync
    #[error("unknown sync handle {0}")]
    UnknownSyncHandle(SyncHandle),

    /// Handle does not name a known connection
    #[error("unknown connection handle {0:#06x}")]
    UnknownConnection(u16),

    /// Train is already synchronized or being synchronized
    #[error("sync to {identity} already exists")]
    SyncAlreadyExists { identity: AdvIdentity },

    // ===== Resource Errors =====
    /// Periodic sync context pool exhausted
    #[error("periodic sync pool exhausted: capacity={capacity}")]
    PoolExhausted { capacity: usize },

    /// Periodic advertiser list full
    #[error("periodic advertiser list full: capacity={capacity}")]
    AdvListFull { capacity: usize },

    /// Periodic advertiser list has no such entry
    #[error("periodic advertiser list has no entry for {identity}")]
    AdvListEntryMissing { identity: AdvIdentity },

    // ===== Scheduling Errors =====
    /// Radio time could not be obtained
    #[error("scheduling failed: {0}")]
    Schedule(#[from] ScheduleError),

    // ===== Codec Errors =====
    /// Timing value not representable
    #[error("timing error: {message}")]
    Timing { message: String },

    /// Malformed or rejected PDU
    #[error("pdu error: {message}")]
    Pdu { message: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkLayerError {
    /// Create invalid parameter error
    pub fn invalid_param(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create command disallowed error
    pub fn disallowed(reason: impl Into<String>) -> Self {
        Self::CommandDisallowed {
            reason: reason.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HCI status returned to the host for this failure.
    pub fn status(&self) -> HciStatus {
        match self {
            Self::InvalidParameters { .. }
            | Self::Timing { .. }
            | Self::Pdu { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigValidation { .. } => HciStatus::InvalidParameters,
            Self::CommandDisallowed { .. } | Self::Io(_) => HciStatus::CommandDisallowed,
            Self::UnknownSyncHandle(_) | Self::AdvListEntryMissing { .. } => {
                HciStatus::UnknownAdvertisingIdentifier
            }
            Self::UnknownConnection(_) => HciStatus::UnknownConnectionIdentifier,
            Self::SyncAlreadyExists { .. } => HciStatus::ConnectionAlreadyExists,
            Self::PoolExhausted { .. } | Self::AdvListFull { .. } => {
                HciStatus::MemoryCapacityExceeded
            }
            Self::Schedule(_) => HciStatus::ConnectionFailedToEstablish,
        }
    }
}
