//! Common error types for EPG sync.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for EPG sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Fetching channels or programs from the program source failed.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A repeatable channel's template cycle has no positive duration.
    #[error("Invalid repeat cycle for channel {channel}: {reason}")]
    InvalidRepeatCycle { channel: String, reason: String },

    /// Writing channels or programs to the store failed.
    #[error("Store write failure: {0}")]
    StoreWriteFailure(String),

    /// Reading channels or programs from the store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The input has no channels after channel reconciliation.
    #[error("No channels for input {0}")]
    NoChannels(String),

    /// The sync run was cancelled.
    #[error("Sync cancelled")]
    Cancelled,

    /// The scheduler worker is not running.
    #[error("Scheduler not running")]
    SchedulerStopped,

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error only affects the channel being synced.
    ///
    /// Channel-scoped errors are reported and the session moves on to the
    /// next channel; every other error aborts the session.
    pub fn is_channel_scoped(&self) -> bool {
        matches!(
            self,
            Error::InvalidRepeatCycle { .. } | Error::StoreWriteFailure(_) | Error::StoreUnavailable(_)
        )
    }

    /// Reason code reported with an error status.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Error::SourceUnavailable(_) => ErrorReason::SourceUnavailable,
            Error::NoChannels(_) => ErrorReason::NoChannels,
            Error::StoreWriteFailure(_) => ErrorReason::StoreWrite,
            Error::StoreUnavailable(_) => ErrorReason::StoreRead,
            Error::InvalidInput(_) | Error::InvalidRepeatCycle { .. } => ErrorReason::InvalidInput,
            _ => ErrorReason::Other,
        }
    }
}

/// Reason attached to an error status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    SourceUnavailable,
    NoChannels,
    StoreWrite,
    StoreRead,
    InvalidInput,
    Other,
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
