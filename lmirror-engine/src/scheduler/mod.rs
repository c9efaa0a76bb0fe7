//! Practice playback scheduler
//!
//! `PlaybackScheduler` is the state machine: it owns the transport, the
//! current clip (by id), the loop counter and the single pending timer.
//! `SchedulerHandle` runs it inside one tokio task and is what callers hold.
//!
//! ```text
//! idle ─start→ prerolling ─→ playing_repeat ─┬→ gap_between_repeats ─→ playing_repeat
//!                                            ├→ gap_between_clips ───→ playing_repeat
//!                                            └→ finished
//! (pausable states) ─pause→ paused ─resume→ (same state)
//! any active state ─stop→ stopped
//! ```

mod actor;
mod core;

pub use self::actor::SchedulerHandle;
pub use self::core::PlaybackScheduler;

use lmirror_common::events::SchedulerState;
use lmirror_common::models::{Clip, ClipId, PracticeConfiguration, PracticeSession, Track};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Everything `start()` needs for one practice run
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Track to play; its `pack_id` is part of the session key
    pub track: Track,
    pub practice_set_id: String,
    /// Full clip list in display order (all kinds)
    pub clips: Vec<Clip>,
    /// Settings snapshot for this run
    pub config: PracticeConfiguration,
    /// Session to continue; `None` starts a fresh session
    pub resume: Option<PracticeSession>,
    pub forever_mode: bool,
}

/// Which wait a pending timer ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Preroll,
    RepeatGap,
    ClipGap,
}

impl TimerKind {
    /// Scheduler state while this wait runs
    pub fn state(&self) -> SchedulerState {
        match self {
            TimerKind::Preroll => SchedulerState::Prerolling,
            TimerKind::RepeatGap => SchedulerState::GapBetweenRepeats,
            TimerKind::ClipGap => SchedulerState::GapBetweenClips,
        }
    }

    pub fn duration(&self, config: &PracticeConfiguration) -> Duration {
        match self {
            TimerKind::Preroll => config.preroll(),
            TimerKind::RepeatGap => config.repeat_gap(),
            TimerKind::ClipGap => config.inter_clip_gap(),
        }
    }
}

/// The one wait the scheduler may have outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub kind: TimerKind,
    pub deadline: Instant,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub state: SchedulerState,
    /// State `resume()` returns to while paused
    pub paused_from: Option<SchedulerState>,
    pub current_clip_id: Option<ClipId>,
    pub current_clip_index: usize,
    pub current_loop_count: u32,
    pub current_speed: f32,
    pub forever_mode: bool,
    /// Last known play head (track milliseconds)
    pub position_ms: u64,
    /// A session save failed and has not yet been retried successfully
    pub save_pending: bool,
    pub session: Option<PracticeSession>,
}
