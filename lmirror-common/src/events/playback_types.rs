//! Playback-related type definitions
//!
//! Supporting types for scheduler state and stop reasons.

use serde::{Deserialize, Serialize};

/// Practice scheduler state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Nothing started yet
    Idle,
    /// Silence before the first repeat of a run
    Prerolling,
    /// Transport is playing a repeat of the current clip
    PlayingRepeat,
    /// Silence between repeats of the same clip
    GapBetweenRepeats,
    /// Silence before moving to the next clip
    GapBetweenClips,
    /// Suspended until resume
    Paused,
    /// Stopped explicitly or by a failure
    Stopped,
    /// Last repeat of the last clip completed
    Finished,
}

impl SchedulerState {
    /// States `pause()` applies to
    pub fn is_pausable(&self) -> bool {
        matches!(
            self,
            SchedulerState::Prerolling
                | SchedulerState::PlayingRepeat
                | SchedulerState::GapBetweenRepeats
                | SchedulerState::GapBetweenClips
        )
    }

    /// States that hold the transport
    pub fn is_active(&self) -> bool {
        self.is_pausable() || *self == SchedulerState::Paused
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Prerolling => write!(f, "prerolling"),
            SchedulerState::PlayingRepeat => write!(f, "playing_repeat"),
            SchedulerState::GapBetweenRepeats => write!(f, "gap_between_repeats"),
            SchedulerState::GapBetweenClips => write!(f, "gap_between_clips"),
            SchedulerState::Paused => write!(f, "paused"),
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Finished => write!(f, "finished"),
        }
    }
}

/// Why a transport failure stopped playback
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailureCode {
    /// Audio file does not exist or cannot be opened
    FileMissing,
    /// Output device unavailable
    DeviceUnavailable,
    /// Any other playback failure
    PlaybackFailed,
}

/// Why playback stopped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called
    UserRequested,
    /// Last repeat of the last clip completed (forever mode off)
    Finished,
    /// A new run replaced this one
    Superseded,
    /// Edits left no drill clip to play
    NoDrillClips,
    /// The audio transport failed
    TransportFailure {
        code: TransportFailureCode,
        message: String,
    },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::UserRequested => write!(f, "user requested"),
            StopReason::Finished => write!(f, "finished"),
            StopReason::Superseded => write!(f, "superseded"),
            StopReason::NoDrillClips => write!(f, "no drill clips"),
            StopReason::TransportFailure { code, message } => {
                write!(f, "transport failure ({:?}): {}", code, message)
            }
        }
    }
}
