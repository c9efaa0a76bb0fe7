//! Event types for the practice engine
//!
//! Provides the notification enum observers receive and the EventBus that
//! delivers it.

mod playback_types;

pub use playback_types::{SchedulerState, StopReason, TransportFailureCode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Practice engine notifications
///
/// Events are broadcast via EventBus in the order the scheduler's
/// transitions happened. Any event describing session state (clip, loop,
/// speed) is emitted only after that state was handed to the session store.
///
/// UIs must resolve `clip_id` against their own clip list; a raw index is
/// never carried because edits shift positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PracticeEvent {
    /// A practice run started
    ///
    /// Triggers:
    /// - UI: Switch transport controls to the playing layout
    PlaybackStarted {
        /// Session being advanced by this run
        session_id: Uuid,
        /// Track being drilled
        track_id: String,
        /// When the run started
        timestamp: DateTime<Utc>,
    },

    /// A practice run ended
    ///
    /// Emitted exactly once per run, whatever ended it.
    PlaybackStopped {
        /// Why the run ended
        reason: StopReason,
        /// When the run ended
        timestamp: DateTime<Utc>,
    },

    /// The active clip changed
    ///
    /// Triggers:
    /// - UI: Highlight the clip, scroll the waveform
    ClipChanged {
        /// Newly active clip
        clip_id: Uuid,
        /// When the clip became active
        timestamp: DateTime<Utc>,
    },

    /// One repeat of a clip finished
    LoopCompleted {
        /// Clip that was repeated
        clip_id: Uuid,
        /// Zero-based repeat number within the current visit
        loop_index: u32,
        /// When the repeat finished
        timestamp: DateTime<Utc>,
    },

    /// Playback rate changed for the next repeat
    SpeedChanged {
        /// Rate now applied (1.0 = original speed)
        new_speed: f32,
        /// When the rate changed
        timestamp: DateTime<Utc>,
    },

    /// Periodic position report
    ///
    /// Not persisted. Used for progress display and for checking whether a
    /// manual split point is legal.
    TimeUpdate {
        /// Position within the track (milliseconds)
        track_time_ms: u64,
        /// Active clip start (milliseconds)
        clip_start_ms: u64,
        /// Active clip end (milliseconds)
        clip_end_ms: u64,
        /// When the position was sampled
        timestamp: DateTime<Utc>,
    },

    /// Scheduler moved between states
    SchedulerStateChanged {
        /// State before change
        old_state: SchedulerState,
        /// State after change
        new_state: SchedulerState,
        /// When state changed
        timestamp: DateTime<Utc>,
    },
}

impl PracticeEvent {
    /// Get event type as string
    pub fn event_type(&self) -> &str {
        match self {
            PracticeEvent::PlaybackStarted { .. } => "PlaybackStarted",
            PracticeEvent::PlaybackStopped { .. } => "PlaybackStopped",
            PracticeEvent::ClipChanged { .. } => "ClipChanged",
            PracticeEvent::LoopCompleted { .. } => "LoopCompleted",
            PracticeEvent::SpeedChanged { .. } => "SpeedChanged",
            PracticeEvent::TimeUpdate { .. } => "TimeUpdate",
            PracticeEvent::SchedulerStateChanged { .. } => "SchedulerStateChanged",
        }
    }

    /// Whether this event describes session state that must be persisted first
    pub fn is_session_transition(&self) -> bool {
        matches!(
            self,
            PracticeEvent::ClipChanged { .. }
                | PracticeEvent::LoopCompleted { .. }
                | PracticeEvent::SpeedChanged { .. }
        )
    }
}

/// Fan-out of practice notifications to every observer
///
/// Backed by a `tokio::sync::broadcast` channel. Publishing never waits on
/// observers; one that falls more than `capacity` events behind gets
/// `RecvError::Lagged` and resumes from the oldest event still buffered.
/// Observers only see events published after they subscribed.
///
/// ```
/// use lmirror_common::events::{EventBus, PracticeEvent};
///
/// let bus = EventBus::new(256);
/// let mut observer = bus.subscribe();
///
/// bus.emit_lossy(PracticeEvent::SpeedChanged {
///     new_speed: 0.9,
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = observer.try_recv().unwrap();
/// assert_eq!(event.event_type(), "SpeedChanged");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PracticeEvent>,
    capacity: usize,
}

impl EventBus {
    /// `capacity` is the per-observer backlog, at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PracticeEvent> {
        self.tx.subscribe()
    }

    /// Publish to current observers, returning how many will see the event.
    /// Fails when nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PracticeEvent,
    ) -> Result<usize, broadcast::error::SendError<PracticeEvent>> {
        self.tx.send(event)
    }

    /// Publish whether or not anyone is subscribed
    pub fn emit_lossy(&self, event: PracticeEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Practice event dropped: no observers");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
