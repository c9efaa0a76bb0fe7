//! Error types for lmirror-engine
//!
//! One thiserror enum per component plus a crate-level `Error` that wraps
//! them for callers (the CLI, collaborators) that just want `?`.

use lmirror_common::events::TransportFailureCode;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for lmirror-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors surfaced by the shared library
    #[error(transparent)]
    Common(#[from] lmirror_common::Error),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Scheduler task is gone
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
}

/// Convenience Result type using lmirror-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Rejections from `start()`
///
/// Returned before any transport call; scheduler state is unchanged.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No drill clips to practice")]
    NoDrillClips,

    #[error("Clip {clip_id} has end_ms <= start_ms")]
    InvalidClipRange { clip_id: Uuid },

    #[error("Clip {clip_id} has a speed override that is not a positive number")]
    InvalidClipSpeed { clip_id: Uuid },

    #[error("Invalid practice configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Resume session is bound to {found}, expected {expected}")]
    SessionMismatch { expected: String, found: String },

    #[error("Transport rejected track: {0}")]
    Transport(#[from] TransportError),
}

/// Clip list edit preconditions
///
/// A failed edit leaves the working list unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("Split point {at_ms} ms is within 500 ms of the clip boundary ({start_ms}-{end_ms} ms)")]
    OutOfRange { at_ms: u64, start_ms: u64, end_ms: u64 },

    #[error("First clip has no previous clip to merge into")]
    NoPreviousClip,

    #[error("Clip index {index} out of range (list has {len} clips)")]
    ClipIndexOutOfRange { index: usize, len: usize },

    #[error("Clip {0} not found")]
    ClipNotFound(Uuid),

    #[error("Invalid clip range {start_ms}-{end_ms} ms")]
    InvalidRange { start_ms: u64, end_ms: u64 },

    #[error("Range {start_ms}-{end_ms} ms overlaps clip {existing}")]
    Overlap {
        start_ms: u64,
        end_ms: u64,
        existing: Uuid,
    },

    #[error("Speed must be a positive number, got {0}")]
    InvalidSpeed(String),
}

/// Session store failures
///
/// Never fatal to a running scheduler; the next transition retries.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Corrupt session row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<lmirror_common::Error> for StoreError {
    fn from(err: lmirror_common::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

/// Audio transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Audio file missing: {0}")]
    FileMissing(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

impl TransportError {
    /// Code carried in `StopReason::TransportFailure`
    pub fn code(&self) -> TransportFailureCode {
        match self {
            TransportError::FileMissing(_) => TransportFailureCode::FileMissing,
            TransportError::DeviceUnavailable(_) => TransportFailureCode::DeviceUnavailable,
            TransportError::PlaybackFailed(_) => TransportFailureCode::PlaybackFailed,
        }
    }

    /// Detail text without the variant prefix
    pub fn detail(&self) -> &str {
        match self {
            TransportError::FileMissing(s)
            | TransportError::DeviceUnavailable(s)
            | TransportError::PlaybackFailed(s) => s,
        }
    }
}
