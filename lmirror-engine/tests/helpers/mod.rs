//! Test helper modules for lmirror-engine integration tests
//!
//! - RecordingTransport: simulated transport that logs every call and can
//!   be told to fail
//! - FlakyStore: in-memory session store with injectable save failures
//! - JournalStore: in-memory session store recording saves and emissions
//!   in the order they happened
//! - Event collection and fixture builders

#![allow(dead_code)]

pub mod flaky_store;
pub mod journal_store;
pub mod recording_transport;

pub use flaky_store::FlakyStore;
pub use journal_store::{JournalEntry, JournalStore};
pub use recording_transport::{RecordingTransport, TransportCall, TransportProbe};

use lmirror_common::events::{EventBus, PracticeEvent, StopReason};
use lmirror_common::models::{Clip, ClipId, ClipKind, PracticeConfiguration, Track};
use lmirror_common::SpeedMode;
use lmirror_engine::session_store::SessionStore;
use lmirror_engine::{PlaybackScheduler, SchedulerHandle, StartRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const PACK_ID: &str = "pack-1";
pub const TRACK_ID: &str = "track-1";
pub const SET_ID: &str = "set-1";

pub fn track() -> Track {
    Track {
        id: TRACK_ID.to_string(),
        pack_id: PACK_ID.to_string(),
        filename: "lesson.m4a".to_string(),
        duration_ms: 60_000,
    }
}

/// `count` adjacent one-second drill clips starting at 0
pub fn drill_clips(count: usize) -> Vec<Clip> {
    (0..count as u64)
        .map(|i| Clip::new(i * 1000, (i + 1) * 1000, ClipKind::Drill))
        .collect()
}

/// Two repeats per clip, ramping 0.8 -> 1.2
pub fn linear_config() -> PracticeConfiguration {
    PracticeConfiguration {
        global_repeats: 2,
        gap_seconds: 0.5,
        inter_clip_gap_seconds: 1.0,
        preroll_ms: 300,
        min_speed: 0.8,
        max_speed: 1.2,
        speed_mode: SpeedMode::Linear,
        speed_mode_n: 2,
    }
}

pub fn request(clips: Vec<Clip>, config: PracticeConfiguration) -> StartRequest {
    StartRequest {
        track: track(),
        practice_set_id: SET_ID.to_string(),
        clips,
        config,
        resume: None,
        forever_mode: false,
    }
}

/// Scheduler task over a recording transport
pub struct Harness {
    pub handle: SchedulerHandle,
    pub task: JoinHandle<()>,
    pub probe: TransportProbe,
    pub events: broadcast::Receiver<PracticeEvent>,
}

impl Harness {
    pub fn spawn(store: Arc<dyn SessionStore>) -> Self {
        Self::spawn_with_bus(store, EventBus::new(1024))
    }

    /// Spawn over a caller-supplied bus, for stores that observe it
    pub fn spawn_with_bus(store: Arc<dyn SessionStore>, bus: EventBus) -> Self {
        let (transport, probe, transport_events) = RecordingTransport::new();
        let scheduler = PlaybackScheduler::new(transport, store, bus);
        let (handle, task) = SchedulerHandle::spawn(scheduler, transport_events);
        let events = handle.subscribe();
        Self {
            handle,
            task,
            probe,
            events,
        }
    }

    pub async fn next_event(&mut self) -> PracticeEvent {
        next_event(&mut self.events).await
    }

    /// Events up to and including the first one matching `pred`
    pub async fn collect_until<F>(&mut self, pred: F) -> Vec<PracticeEvent>
    where
        F: Fn(&PracticeEvent) -> bool,
    {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    pub async fn collect_until_stopped(&mut self) -> Vec<PracticeEvent> {
        self.collect_until(|e| matches!(e, PracticeEvent::PlaybackStopped { .. }))
            .await
    }

    /// Everything already on the bus, without waiting
    pub fn drain(&mut self) -> Vec<PracticeEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

/// Next event, failing the test if none arrives within ten minutes of
/// (usually paused) tokio time
pub async fn next_event(rx: &mut broadcast::Receiver<PracticeEvent>) -> PracticeEvent {
    tokio::time::timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("timed out waiting for practice event")
        .expect("event bus closed")
}

/// Session-relevant event, compact enough to compare whole sequences
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Started,
    Clip(ClipId),
    Loop(ClipId, u32),
    /// Speed in hundredths
    Speed(i32),
    Stopped(StopReason),
}

pub fn steps(events: &[PracticeEvent]) -> Vec<Step> {
    events
        .iter()
        .filter_map(|event| match event {
            PracticeEvent::PlaybackStarted { .. } => Some(Step::Started),
            PracticeEvent::ClipChanged { clip_id, .. } => Some(Step::Clip(*clip_id)),
            PracticeEvent::LoopCompleted {
                clip_id,
                loop_index,
                ..
            } => Some(Step::Loop(*clip_id, *loop_index)),
            PracticeEvent::SpeedChanged { new_speed, .. } => Some(Step::Speed(hundredths(*new_speed))),
            PracticeEvent::PlaybackStopped { reason, .. } => Some(Step::Stopped(reason.clone())),
            _ => None,
        })
        .collect()
}

pub fn hundredths(speed: f32) -> i32 {
    (speed * 100.0).round() as i32
}
