//! Scheduler state machine
//!
//! **Responsibilities:**
//! - Start/pause/resume/stop lifecycle of one practice run
//! - Repeat counting, gaps and pre-roll via a single pending timer
//! - Speed per repeat from the configured curve
//! - Relocating the current clip by id after clip list edits
//! - Persist-then-notify for every session transition
//!
//! The scheduler never sleeps. Waits are recorded as a `PendingTimer`; the
//! owner (see `SchedulerHandle`) calls `on_timer_elapsed` once the deadline
//! passes. A zero-length wait gets a deadline of "now".

use super::{PendingTimer, SchedulerSnapshot, StartRequest, TimerKind};
use crate::editor::ClipEdit;
use crate::error::{PlaybackError, TransportError};
use crate::session_store::SessionStore;
use crate::transport::{AudioTransport, SegmentId, TransportEvent};
use chrono::Utc;
use lmirror_common::events::{EventBus, PracticeEvent, SchedulerState, StopReason};
use lmirror_common::models::{
    drill_clips, Clip, ClipId, PracticeConfiguration, PracticeSession, SessionKey, Track,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Speeds closer than this are the same speed
const SPEED_EPSILON: f32 = 1e-4;

/// Upper bound on any single wait; matches the longest gap a valid
/// configuration allows
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// State of the run in progress (or the last run, once stopped)
struct Run {
    track: Track,
    clips: Vec<Clip>,
    config: PracticeConfiguration,
    session: PracticeSession,
    /// Source of truth for the current clip; the session index is derived
    current_clip: ClipId,
    /// The clip gap in progress still has to move to the next clip
    advance_on_gap_end: bool,
    /// The paused repeat's clip was relocated; replay instead of resuming
    restart_on_resume: bool,
    /// The transport finished the range just as we paused
    finished_while_paused: bool,
    position_ms: u64,
}

impl Run {
    fn current(&self) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == self.current_clip)
    }

    fn drill_ids(&self) -> Vec<ClipId> {
        drill_clips(&self.clips).iter().map(|c| c.id).collect()
    }

    fn is_drill(&self, id: ClipId) -> bool {
        self.clips.iter().any(|c| c.id == id && c.is_drill())
    }

    fn drill_index_of(&self, id: ClipId) -> Option<usize> {
        self.drill_ids().iter().position(|d| *d == id)
    }

    /// Next drill clip after `id`, without wrapping
    fn next_drill_after(&self, id: ClipId) -> Option<ClipId> {
        let drill = self.drill_ids();
        let pos = drill.iter().position(|d| *d == id)?;
        drill.get(pos + 1).copied()
    }

    fn first_drill(&self) -> Option<ClipId> {
        self.drill_ids().first().copied()
    }

    /// Derive the persisted index from the current clip id
    fn sync_session(&mut self) {
        let drill_len = self.drill_ids().len();
        if let Some(index) = self.drill_index_of(self.current_clip) {
            self.session.current_clip_index = index;
        }
        self.session.clamp_index(drill_len);
    }
}

/// Where the current clip goes after an edit
enum Relocation {
    /// Still a drill clip; only its index may have shifted
    Keep,
    MoveTo(ClipId),
    /// No drill clip left to move to
    Exhausted,
}

/// Practice playback state machine
pub struct PlaybackScheduler<T: AudioTransport> {
    transport: T,
    store: Arc<dyn SessionStore>,
    bus: EventBus,
    state: SchedulerState,
    /// State to return to on resume
    paused_from: Option<SchedulerState>,
    run: Option<Run>,
    timer: Option<PendingTimer>,
    /// Token of the last `play_range`; older notifications are stale
    segment: SegmentId,
    /// Last session save failed; the next transition writes the latest state
    save_pending: bool,
}

impl<T: AudioTransport> PlaybackScheduler<T> {
    pub fn new(transport: T, store: Arc<dyn SessionStore>, bus: EventBus) -> Self {
        Self {
            transport,
            store,
            bus,
            state: SchedulerState::Idle,
            paused_from: None,
            run: None,
            timer: None,
            segment: 0,
            save_pending: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pending_timer(&self) -> Option<PendingTimer> {
        self.timer
    }

    pub fn session(&self) -> Option<&PracticeSession> {
        self.run.as_ref().map(|r| &r.session)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let run = self.run.as_ref();
        SchedulerSnapshot {
            state: self.state,
            paused_from: self.paused_from,
            current_clip_id: run.map(|r| r.current_clip),
            current_clip_index: run.map(|r| r.session.current_clip_index).unwrap_or(0),
            current_loop_count: run.map(|r| r.session.current_loop_count).unwrap_or(0),
            current_speed: run.map(|r| r.session.current_speed).unwrap_or(1.0),
            forever_mode: run.map(|r| r.session.forever_mode).unwrap_or(false),
            position_ms: run.map(|r| r.position_ms).unwrap_or(0),
            save_pending: self.save_pending,
            session: run.map(|r| r.session.clone()),
        }
    }

    /// Begin a practice run
    ///
    /// All validation happens before the transport is touched; a rejected
    /// request leaves the scheduler exactly as it was. An active run is
    /// stopped (reason `Superseded`) first. Returns the session id.
    pub async fn start(&mut self, request: StartRequest) -> Result<Uuid, PlaybackError> {
        let StartRequest {
            track,
            practice_set_id,
            clips,
            config,
            resume,
            forever_mode,
        } = request;

        config
            .validate()
            .map_err(|e| PlaybackError::InvalidConfiguration(e.to_string()))?;

        if let Some(bad) = clips.iter().find(|c| !c.has_valid_range()) {
            return Err(PlaybackError::InvalidClipRange { clip_id: bad.id });
        }
        if let Some(bad) = clips.iter().find(|c| !c.has_valid_speeds()) {
            return Err(PlaybackError::InvalidClipSpeed { clip_id: bad.id });
        }

        let drill: Vec<ClipId> = drill_clips(&clips).iter().map(|c| c.id).collect();
        if drill.is_empty() {
            return Err(PlaybackError::NoDrillClips);
        }

        let key = SessionKey::new(track.pack_id.clone(), track.id.clone(), practice_set_id);
        if let Some(session) = &resume {
            if !session.is_bound_to(&key) {
                return Err(PlaybackError::SessionMismatch {
                    expected: key.to_string(),
                    found: session.key().to_string(),
                });
            }
        }

        if self.state.is_active() {
            info!("Superseding active practice run");
            self.stop_with(StopReason::Superseded).await;
        }

        self.transport.load(&track).await?;

        let mut session =
            resume.unwrap_or_else(|| PracticeSession::create(&clips, key, &config));
        session.forever_mode = forever_mode;
        session.clamp_index(drill.len());

        // A session saved right after its clip's last repeat resumes on the next clip
        let mut index = session.current_clip_index;
        let planned = clips
            .iter()
            .find(|c| c.id == drill[index])
            .map(|c| config.repeats_for(c))
            .unwrap_or(1);
        if session.current_loop_count >= planned {
            index = if index + 1 < drill.len() { index + 1 } else { 0 };
            session.current_loop_count = 0;
        }
        session.current_clip_index = index;

        let current_clip = drill[index];
        let session_id = session.id;
        let track_id = track.id.clone();

        info!(
            session_id = %session_id,
            track_id = %track_id,
            clip_index = index,
            loop_count = session.current_loop_count,
            forever_mode,
            "Starting practice run"
        );

        self.run = Some(Run {
            track,
            clips,
            config,
            session,
            current_clip,
            advance_on_gap_end: false,
            restart_on_resume: false,
            finished_while_paused: false,
            position_ms: 0,
        });
        self.timer = None;
        self.paused_from = None;

        self.commit(vec![
            PracticeEvent::PlaybackStarted {
                session_id,
                track_id,
                timestamp: Utc::now(),
            },
            PracticeEvent::ClipChanged {
                clip_id: current_clip,
                timestamp: Utc::now(),
            },
        ])
        .await;

        self.wait(TimerKind::Preroll);
        Ok(session_id)
    }

    /// Suspend the run; no-op outside pausable states
    pub async fn pause(&mut self) {
        if !self.state.is_pausable() {
            debug!(state = %self.state, "Pause ignored");
            return;
        }

        let from = self.state;
        if from == SchedulerState::PlayingRepeat {
            if let Err(e) = self.transport.pause().await {
                self.fail(e).await;
                return;
            }
        } else {
            // Waits restart from their full duration on resume
            self.timer = None;
        }

        self.paused_from = Some(from);
        self.transition(SchedulerState::Paused);
    }

    /// Continue a paused run, optionally with a new configuration snapshot
    ///
    /// No-op unless paused. An invalid configuration is rejected and the
    /// scheduler stays paused.
    pub async fn resume(
        &mut self,
        config: Option<PracticeConfiguration>,
    ) -> Result<(), PlaybackError> {
        if self.state != SchedulerState::Paused {
            debug!(state = %self.state, "Resume ignored");
            return Ok(());
        }

        if let Some(config) = config {
            config
                .validate()
                .map_err(|e| PlaybackError::InvalidConfiguration(e.to_string()))?;
            if let Some(run) = self.run.as_mut() {
                run.config = config;
            }
        }

        let Some(from) = self.paused_from.take() else {
            return Ok(());
        };

        match from {
            SchedulerState::PlayingRepeat => {
                let (restart, finished) = match self.run.as_mut() {
                    Some(run) => (
                        std::mem::take(&mut run.restart_on_resume),
                        std::mem::take(&mut run.finished_while_paused),
                    ),
                    None => (false, false),
                };

                if restart {
                    self.begin_repeat().await;
                } else if finished {
                    self.transition(SchedulerState::PlayingRepeat);
                    self.complete_repeat().await;
                } else {
                    match self.transport.resume().await {
                        Ok(()) => self.transition(SchedulerState::PlayingRepeat),
                        Err(e) => self.fail(e).await,
                    }
                }
            }
            SchedulerState::Prerolling => self.wait(TimerKind::Preroll),
            SchedulerState::GapBetweenRepeats => self.wait(TimerKind::RepeatGap),
            SchedulerState::GapBetweenClips => self.wait(TimerKind::ClipGap),
            other => warn!(state = %other, "Paused from unexpected state"),
        }

        Ok(())
    }

    /// End the run; no-op unless a run is active
    pub async fn stop(&mut self) {
        if !self.state.is_active() {
            debug!(state = %self.state, "Stop ignored");
            return;
        }
        self.stop_with(StopReason::UserRequested).await;
    }

    /// Toggle wrap-around at the end of the drill list
    pub async fn set_forever_mode(&mut self, enabled: bool) {
        let changed = match self.run.as_mut() {
            Some(run) if run.session.forever_mode != enabled => {
                run.session.forever_mode = enabled;
                true
            }
            _ => false,
        };
        if changed {
            info!(enabled, "Forever mode changed");
            self.commit(Vec::new()).await;
        }
    }

    /// Adopt an edited clip list, keeping the current clip by identity
    pub async fn apply_edit(&mut self, clips: Vec<Clip>, edit: ClipEdit) {
        if let Some(bad) = clips.iter().find(|c| !c.has_valid_range()) {
            warn!(clip_id = %bad.id, "Ignoring clip list with invalid range");
            return;
        }
        if let Some(bad) = clips.iter().find(|c| !c.has_valid_speeds()) {
            warn!(clip_id = %bad.id, "Ignoring clip list with invalid speed override");
            return;
        }

        let active = self.state.is_active();
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let old_clips = std::mem::replace(&mut run.clips, clips);
        if !active {
            return;
        }

        let current = run.current_clip;
        let hinted = match &edit {
            ClipEdit::Split { original, right } if *original == current => Some(*right),
            ClipEdit::Merged { removed, into } if *removed == current => Some(*into),
            _ => None,
        }
        .filter(|id| run.is_drill(*id));

        let relocation = if let Some(id) = hinted {
            Relocation::MoveTo(id)
        } else if run.is_drill(current) {
            Relocation::Keep
        } else {
            // Next drill clip at or after the old clip's position
            let old_start = old_clips
                .iter()
                .find(|c| c.id == current)
                .map(|c| c.start_ms)
                .unwrap_or(0);
            let candidate = run
                .clips
                .iter()
                .filter(|c| c.is_drill())
                .find(|c| c.start_ms >= old_start)
                .map(|c| c.id)
                .or_else(|| {
                    if run.session.forever_mode {
                        run.first_drill()
                    } else {
                        None
                    }
                });
            match candidate {
                Some(id) => Relocation::MoveTo(id),
                None => Relocation::Exhausted,
            }
        };

        match relocation {
            Relocation::Keep => {
                let index_moved = run
                    .drill_index_of(current)
                    .map(|i| i != run.session.current_clip_index)
                    .unwrap_or(false);
                if index_moved {
                    debug!(clip_id = %current, "Current clip index shifted by edit");
                    self.commit(vec![PracticeEvent::ClipChanged {
                        clip_id: current,
                        timestamp: Utc::now(),
                    }])
                    .await;
                }
            }
            Relocation::MoveTo(id) => {
                info!(from = %current, to = %id, "Relocating current clip after edit");
                run.current_clip = id;
                run.session.current_loop_count = 0;
                run.finished_while_paused = false;

                let mut replay = false;
                match (self.state, self.paused_from) {
                    (SchedulerState::PlayingRepeat, _) => replay = true,
                    (SchedulerState::GapBetweenClips, _)
                    | (SchedulerState::Paused, Some(SchedulerState::GapBetweenClips)) => {
                        run.advance_on_gap_end = false;
                    }
                    (SchedulerState::Paused, Some(SchedulerState::PlayingRepeat)) => {
                        run.restart_on_resume = true;
                    }
                    _ => {}
                }

                self.commit(vec![PracticeEvent::ClipChanged {
                    clip_id: id,
                    timestamp: Utc::now(),
                }])
                .await;

                if replay {
                    self.begin_repeat().await;
                }
            }
            Relocation::Exhausted => {
                let reason = self.no_candidate_reason();
                info!(%reason, "No clip left to practice after edit");
                self.stop_with(reason).await;
            }
        }
    }

    /// Handle a notification from the transport
    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        if event.segment() != self.segment {
            debug!(segment = event.segment(), current = self.segment, "Ignoring stale transport event");
            return;
        }

        match event {
            TransportEvent::Tick { position_ms, .. } => {
                if self.state != SchedulerState::PlayingRepeat {
                    return;
                }
                let Some(run) = self.run.as_mut() else {
                    return;
                };
                run.position_ms = position_ms;
                let (clip_start_ms, clip_end_ms) = run
                    .current()
                    .map(|c| (c.start_ms, c.end_ms))
                    .unwrap_or((0, 0));
                self.emit(PracticeEvent::TimeUpdate {
                    track_time_ms: position_ms,
                    clip_start_ms,
                    clip_end_ms,
                    timestamp: Utc::now(),
                });
            }
            TransportEvent::RangeFinished { .. } => match self.state {
                SchedulerState::PlayingRepeat => self.complete_repeat().await,
                SchedulerState::Paused
                    if self.paused_from == Some(SchedulerState::PlayingRepeat) =>
                {
                    if let Some(run) = self.run.as_mut() {
                        run.finished_while_paused = true;
                    }
                }
                _ => {}
            },
            TransportEvent::Failed { error, .. } => {
                if self.state.is_active() {
                    self.fail(error).await;
                }
            }
        }
    }

    /// Finish the pending wait
    ///
    /// Safe to call early: whatever the wait was for happens now.
    pub async fn on_timer_elapsed(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        if self.state != timer.kind.state() {
            return;
        }

        match timer.kind {
            TimerKind::Preroll => self.begin_repeat().await,
            TimerKind::RepeatGap => {
                // A resume with fewer repeats may have used up this clip already
                let exhausted = self
                    .run
                    .as_ref()
                    .and_then(|run| {
                        run.current()
                            .map(|c| run.session.current_loop_count >= run.config.repeats_for(c))
                    })
                    .unwrap_or(false);
                if exhausted {
                    self.end_of_clip().await;
                } else {
                    self.begin_repeat().await;
                }
            }
            TimerKind::ClipGap => self.advance_clip().await,
        }
    }

    /// Arm the timer for `kind`, entering its state
    fn wait(&mut self, kind: TimerKind) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let duration = kind.duration(&run.config).min(MAX_WAIT);
        self.transition(kind.state());
        self.timer = Some(PendingTimer {
            kind,
            deadline: Instant::now() + duration,
        });
        debug!(?kind, duration_ms = duration.as_millis() as u64, "Waiting");
    }

    /// Play the current clip at the speed for its current loop
    async fn begin_repeat(&mut self) {
        let prepared = self.run.as_mut().and_then(|run| {
            let clip = run.current()?.clone();
            let loop_index = run.session.current_loop_count;
            let speed = run.config.speed_for(&clip, loop_index);
            let changed = (speed - run.session.current_speed).abs() > SPEED_EPSILON;
            if changed {
                run.session.current_speed = speed;
            }
            run.restart_on_resume = false;
            run.finished_while_paused = false;
            run.position_ms = clip.start_ms;
            Some((clip, loop_index, speed, changed))
        });

        let Some((clip, loop_index, speed, changed)) = prepared else {
            let reason = self.no_candidate_reason();
            warn!(%reason, "Current clip missing from list");
            self.stop_with(reason).await;
            return;
        };

        if changed {
            self.commit(vec![PracticeEvent::SpeedChanged {
                new_speed: speed,
                timestamp: Utc::now(),
            }])
            .await;
        }

        self.timer = None;
        self.segment += 1;
        match self
            .transport
            .play_range(self.segment, clip.start_ms, clip.end_ms, speed)
            .await
        {
            Ok(()) => {
                debug!(
                    clip_id = %clip.id,
                    loop_index,
                    speed,
                    segment = self.segment,
                    "Playing repeat"
                );
                self.transition(SchedulerState::PlayingRepeat);
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Count the repeat that just ended and decide what follows
    async fn complete_repeat(&mut self) {
        let completed = self.run.as_mut().and_then(|run| {
            let clip = run.current()?.clone();
            let loop_index = run.session.current_loop_count;
            run.session.current_loop_count += 1;
            run.session.record_completed_repeat(clip.id);
            Some((clip.id, loop_index, run.config.repeats_for(&clip)))
        });
        let Some((clip_id, loop_index, planned)) = completed else {
            return;
        };

        self.commit(vec![PracticeEvent::LoopCompleted {
            clip_id,
            loop_index,
            timestamp: Utc::now(),
        }])
        .await;

        if loop_index + 1 < planned {
            self.wait(TimerKind::RepeatGap);
        } else {
            self.end_of_clip().await;
        }
    }

    /// Last repeat of the current clip is done
    async fn end_of_clip(&mut self) {
        let continues = match self.run.as_mut() {
            Some(run) => {
                let has_next = run.next_drill_after(run.current_clip).is_some();
                let wraps = run.session.forever_mode && run.first_drill().is_some();
                if has_next || wraps {
                    run.advance_on_gap_end = true;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if continues {
            self.wait(TimerKind::ClipGap);
        } else {
            let reason = self.no_candidate_reason();
            self.stop_with(reason).await;
        }
    }

    /// Inter-clip gap over: move on (unless an edit already did) and play
    async fn advance_clip(&mut self) {
        let next = match self.run.as_mut() {
            Some(run) if run.advance_on_gap_end => {
                run.advance_on_gap_end = false;
                let next = run.next_drill_after(run.current_clip).or_else(|| {
                    if run.session.forever_mode {
                        run.first_drill()
                    } else {
                        None
                    }
                });
                match next {
                    Some(id) => {
                        run.current_clip = id;
                        run.session.current_loop_count = 0;
                        Some(Some(id))
                    }
                    None => None,
                }
            }
            Some(_) => Some(None),
            None => return,
        };

        match next {
            Some(Some(clip_id)) => {
                self.commit(vec![PracticeEvent::ClipChanged {
                    clip_id,
                    timestamp: Utc::now(),
                }])
                .await;
                self.begin_repeat().await;
            }
            Some(None) => self.begin_repeat().await,
            None => {
                let reason = self.no_candidate_reason();
                self.stop_with(reason).await;
            }
        }
    }

    fn no_candidate_reason(&self) -> StopReason {
        match &self.run {
            Some(run) if !run.drill_ids().is_empty() => StopReason::Finished,
            _ => StopReason::NoDrillClips,
        }
    }

    async fn fail(&mut self, error: TransportError) {
        error!(error = %error, "Transport failure, stopping practice run");
        self.stop_with(StopReason::TransportFailure {
            code: error.code(),
            message: error.detail().to_string(),
        })
        .await;
    }

    /// Tear down the run and emit the single stop event
    async fn stop_with(&mut self, reason: StopReason) {
        self.timer = None;
        self.paused_from = None;
        // Invalidate the segment so a late end-of-range is ignored
        self.segment += 1;
        self.transport.stop().await;

        if self.save_pending {
            self.commit(Vec::new()).await;
        }

        let final_state = if reason == StopReason::Finished {
            SchedulerState::Finished
        } else {
            SchedulerState::Stopped
        };
        self.transition(final_state);

        if let Some(run) = &self.run {
            info!(
                session_id = %run.session.id,
                track_id = %run.track.id,
                %reason,
                "Practice run ended"
            );
        }
        self.emit(PracticeEvent::PlaybackStopped {
            reason,
            timestamp: Utc::now(),
        });
    }

    /// Persist the session, then publish `events`
    ///
    /// A failed save is logged and retried by the next commit; the events
    /// still go out.
    async fn commit(&mut self, events: Vec<PracticeEvent>) {
        if let Some(run) = self.run.as_mut() {
            run.sync_session();
            match self.store.save(&mut run.session).await {
                Ok(()) => {
                    if self.save_pending {
                        info!(session_id = %run.session.id, "Session save recovered");
                    }
                    self.save_pending = false;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        session_id = %run.session.id,
                        "Failed to save practice session, will retry on next transition"
                    );
                    self.save_pending = true;
                }
            }
        }

        for event in events {
            self.emit(event);
        }
    }

    fn transition(&mut self, new_state: SchedulerState) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        debug!(%old_state, %new_state, "Scheduler state changed");
        self.emit(PracticeEvent::SchedulerStateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: PracticeEvent) {
        self.bus.emit_lossy(event);
    }
}
