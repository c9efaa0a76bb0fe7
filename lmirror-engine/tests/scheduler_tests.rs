//! Scheduler behavior over a full practice run
//!
//! All tests run on tokio's paused clock: timers and simulated playback
//! complete instantly in wall time while keeping their relative order.

mod helpers;

use helpers::*;
use lmirror_common::events::{
    EventBus, PracticeEvent, SchedulerState, StopReason, TransportFailureCode,
};
use lmirror_common::models::{PracticeConfiguration, PracticeSession, SessionKey};
use lmirror_engine::error::{Error, PlaybackError, TransportError};
use lmirror_engine::session_store::{MemorySessionStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn states(events: &[PracticeEvent]) -> Vec<SchedulerState> {
    events
        .iter()
        .filter_map(|e| match e {
            PracticeEvent::SchedulerStateChanged { new_state, .. } => Some(*new_state),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_three_clips_two_linear_repeats_then_finish() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    let clips = drill_clips(3);
    let (c0, c1, c2) = (clips[0].id, clips[1].id, clips[2].id);

    let started = Instant::now();
    h.handle.start(request(clips, linear_config())).await.unwrap();

    let mut events = Vec::new();
    loop {
        let event = h.next_event().await;
        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(snapshot.current_clip_index < 3, "index out of bounds: {:?}", snapshot);
        let done = matches!(event, PracticeEvent::PlaybackStopped { .. });
        events.push(event);
        if done {
            break;
        }
    }

    assert_eq!(
        steps(&events),
        vec![
            Step::Started,
            Step::Clip(c0),
            Step::Loop(c0, 0),
            Step::Speed(120),
            Step::Loop(c0, 1),
            Step::Clip(c1),
            Step::Speed(80),
            Step::Loop(c1, 0),
            Step::Speed(120),
            Step::Loop(c1, 1),
            Step::Clip(c2),
            Step::Speed(80),
            Step::Loop(c2, 0),
            Step::Speed(120),
            Step::Loop(c2, 1),
            Step::Stopped(StopReason::Finished),
        ]
    );

    let rates: Vec<(u64, u64, i32)> = h
        .probe
        .played_ranges()
        .into_iter()
        .map(|(s, e, r)| (s, e, hundredths(r)))
        .collect();
    assert_eq!(
        rates,
        vec![
            (0, 1000, 80),
            (0, 1000, 120),
            (1000, 2000, 80),
            (1000, 2000, 120),
            (2000, 3000, 80),
            (2000, 3000, 120),
        ]
    );

    // Pre-roll happens once; finishing is its own terminal state
    let seen = states(&events);
    assert_eq!(
        seen.iter().filter(|s| **s == SchedulerState::Prerolling).count(),
        1
    );
    assert_eq!(seen.first(), Some(&SchedulerState::Prerolling));
    assert_eq!(seen.last(), Some(&SchedulerState::Finished));
    assert!(!seen.contains(&SchedulerState::Stopped));

    // 0.3 preroll + 3 x (1.25 + 0.5 + 0.833) + 2 x 1.0 clip gaps
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(10_000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(10_500), "{:?}", elapsed);

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SchedulerState::Finished);
    let session = snapshot.session.unwrap();
    assert_eq!(session.play_count(&c0), 2);
    assert_eq!(session.play_count(&c1), 2);
    assert_eq!(session.play_count(&c2), 2);
    assert_eq!(session.current_clip_index, 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_saved_before_each_transition_event() {
    let bus = EventBus::new(1024);
    let store = Arc::new(JournalStore::new(&bus));
    let mut h = Harness::spawn_with_bus(store.clone(), bus);
    let clips = drill_clips(3);
    let ids: Vec<_> = clips.iter().map(|c| c.id).collect();

    h.handle.start(request(clips, linear_config())).await.unwrap();
    h.collect_until_stopped().await;

    let mut last_saved: Option<PracticeSession> = None;
    let mut checked = 0;
    for entry in store.entries() {
        let event = match entry {
            JournalEntry::Saved(session) => {
                last_saved = Some(session);
                continue;
            }
            JournalEntry::Emitted(event) => event,
        };
        if !event.is_session_transition() {
            continue;
        }
        let saved = last_saved
            .as_ref()
            .unwrap_or_else(|| panic!("{:?} emitted before any save", event));
        let saved_clip = ids[saved.current_clip_index];

        match &event {
            PracticeEvent::ClipChanged { clip_id, .. } => {
                assert_eq!(saved_clip, *clip_id, "{:?} ahead of store", event);
            }
            PracticeEvent::LoopCompleted {
                clip_id,
                loop_index,
                ..
            } => {
                assert_eq!(saved_clip, *clip_id, "{:?} ahead of store", event);
                assert_eq!(saved.current_loop_count, loop_index + 1);
                assert_eq!(saved.play_count(clip_id), loop_index + 1);
            }
            PracticeEvent::SpeedChanged { new_speed, .. } => {
                assert!(
                    (saved.current_speed - new_speed).abs() < 1e-6,
                    "{:?} ahead of store speed {}",
                    event,
                    saved.current_speed
                );
            }
            _ => unreachable!(),
        }
        checked += 1;
    }

    // 3 clip changes, 6 completed loops, 5 speed changes
    assert_eq!(checked, 14);
}

#[tokio::test(start_paused = true)]
async fn test_forever_mode_wraps_to_first_clip() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    let clips = drill_clips(3);
    let (c0, c2) = (clips[0].id, clips[2].id);

    let mut req = request(clips, linear_config());
    req.forever_mode = true;
    h.handle.start(req).await.unwrap();

    let is_c0 = |e: &PracticeEvent| matches!(e, PracticeEvent::ClipChanged { clip_id, .. } if *clip_id == c0);
    h.collect_until(is_c0).await;
    let lap = h.collect_until(is_c0).await;

    let lap_steps = steps(&lap);
    assert!(!lap_steps.iter().any(|s| matches!(s, Step::Stopped(_))));
    assert_eq!(
        &lap_steps[lap_steps.len() - 2..],
        &[Step::Loop(c2, 1), Step::Clip(c0)]
    );
    assert_ne!(h.handle.snapshot().await.unwrap().state, SchedulerState::Finished);

    h.handle.stop().await.unwrap();
    let tail = h.collect_until_stopped().await;
    assert_eq!(
        steps(&tail).last(),
        Some(&Step::Stopped(StopReason::UserRequested))
    );

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SchedulerState::Stopped);
    assert!(snapshot.forever_mode);
    assert_eq!(snapshot.current_clip_id, Some(c0));
    assert_eq!(snapshot.session.unwrap().play_count(&c0), 2);
}

#[tokio::test(start_paused = true)]
async fn test_save_failure_does_not_interrupt_playback() {
    let store = Arc::new(FlakyStore::new());
    let mut h = Harness::spawn(store.clone());
    let clips = drill_clips(2);
    let c0 = clips[0].id;
    let key = SessionKey::new(PACK_ID, TRACK_ID, SET_ID);

    h.handle.start(request(clips, linear_config())).await.unwrap();
    store.fail_next_saves(1);

    // The failed save still announces the completed repeat on schedule
    let events = h
        .collect_until(|e| matches!(e, PracticeEvent::LoopCompleted { .. }))
        .await;
    assert_eq!(steps(&events).last(), Some(&Step::Loop(c0, 0)));
    assert_eq!(store.failed_saves(), 1);
    assert!(h.handle.snapshot().await.unwrap().save_pending);

    let stale = store.load(&key).await.unwrap().unwrap();
    assert_eq!(stale.current_loop_count, 0);
    assert_eq!(stale.play_count(&c0), 0);

    // Next transition writes the latest state, not the missed one
    h.collect_until(|e| matches!(e, PracticeEvent::SpeedChanged { .. }))
        .await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.save_pending);

    let saved = store.load(&key).await.unwrap().unwrap();
    assert_eq!(saved.current_loop_count, 1);
    assert_eq!(saved.play_count(&c0), 1);
    assert_eq!(hundredths(saved.current_speed), 120);

    let rest = h.collect_until_stopped().await;
    assert_eq!(
        steps(&rest).last(),
        Some(&Step::Stopped(StopReason::Finished))
    );
    let final_saved = store.load(&key).await.unwrap().unwrap();
    assert_eq!(Some(final_saved), h.handle.snapshot().await.unwrap().session);
}

#[tokio::test(start_paused = true)]
async fn test_transport_load_failure_rejects_start() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    h.probe
        .fail_next_load(TransportError::FileMissing("lesson.m4a".to_string()));

    let err = h
        .handle
        .start(request(drill_clips(2), linear_config()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Playback(PlaybackError::Transport(TransportError::FileMissing(_)))
    ));

    assert!(h.drain().is_empty());
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SchedulerState::Idle);
    assert!(snapshot.session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_play_failure_stops_run() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    h.probe
        .fail_next_play(TransportError::DeviceUnavailable("headphones unplugged".to_string()));

    h.handle
        .start(request(drill_clips(2), linear_config()))
        .await
        .unwrap();
    let events = h.collect_until_stopped().await;

    assert_eq!(
        steps(&events).last(),
        Some(&Step::Stopped(StopReason::TransportFailure {
            code: TransportFailureCode::DeviceUnavailable,
            message: "headphones unplugged".to_string(),
        }))
    );
    assert_eq!(h.handle.snapshot().await.unwrap().state, SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_pause_during_preroll_waits_full_preroll_again() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    h.handle
        .start(request(drill_clips(1), linear_config()))
        .await
        .unwrap();
    h.handle.pause().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SchedulerState::Paused);
    assert_eq!(snapshot.paused_from, Some(SchedulerState::Prerolling));
    assert!(h.probe.played_ranges().is_empty());

    let resumed = Instant::now();
    h.handle.resume(None).await.unwrap();
    h.collect_until(|e| {
        matches!(
            e,
            PracticeEvent::SchedulerStateChanged {
                new_state: SchedulerState::PlayingRepeat,
                ..
            }
        )
    })
    .await;
    assert!(resumed.elapsed() >= Duration::from_millis(300));
    assert_eq!(h.probe.played_ranges().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_mid_repeat_holds_and_resumes_transport() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    let clips = drill_clips(1);
    let c0 = clips[0].id;
    h.handle.start(request(clips, linear_config())).await.unwrap();

    h.collect_until(|e| {
        matches!(
            e,
            PracticeEvent::SchedulerStateChanged {
                new_state: SchedulerState::PlayingRepeat,
                ..
            }
        )
    })
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.handle.pause().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    let during_pause = h.drain();
    assert!(!steps(&during_pause).contains(&Step::Loop(c0, 0)));

    h.handle.resume(None).await.unwrap();
    let events = h
        .collect_until(|e| matches!(e, PracticeEvent::LoopCompleted { .. }))
        .await;
    assert_eq!(steps(&events).last(), Some(&Step::Loop(c0, 0)));

    let calls = h.probe.calls();
    assert!(calls.contains(&TransportCall::Pause));
    assert!(calls.contains(&TransportCall::Resume));
    assert_eq!(h.probe.played_ranges().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_commands_are_idempotent() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    h.handle
        .start(request(drill_clips(2), linear_config()))
        .await
        .unwrap();
    h.drain();

    h.handle.pause().await.unwrap();
    h.handle.pause().await.unwrap();
    assert_eq!(states(&h.drain()), vec![SchedulerState::Paused]);

    h.handle.resume(None).await.unwrap();
    h.handle.resume(None).await.unwrap();
    assert_eq!(states(&h.drain()), vec![SchedulerState::Prerolling]);

    h.handle.stop().await.unwrap();
    h.handle.stop().await.unwrap();
    let stops = h
        .drain()
        .into_iter()
        .filter(|e| matches!(e, PracticeEvent::PlaybackStopped { .. }))
        .count();
    assert_eq!(stops, 1);

    // Nothing to pause or resume once stopped
    h.handle.pause().await.unwrap();
    h.handle.resume(None).await.unwrap();
    assert!(h.drain().is_empty());
    assert_eq!(h.handle.snapshot().await.unwrap().state, SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_start_supersedes_active_run() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    let first = h
        .handle
        .start(request(drill_clips(2), linear_config()))
        .await
        .unwrap();
    h.drain();

    let second = h
        .handle
        .start(request(drill_clips(2), linear_config()))
        .await
        .unwrap();
    assert_ne!(first, second);

    let events = h.drain();
    let stopped_at = events
        .iter()
        .position(|e| matches!(e, PracticeEvent::PlaybackStopped { .. }))
        .unwrap();
    let started_at = events
        .iter()
        .position(|e| matches!(e, PracticeEvent::PlaybackStarted { .. }))
        .unwrap();
    assert!(stopped_at < started_at);
    assert_eq!(
        steps(&events)[0],
        Step::Stopped(StopReason::Superseded)
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_with_new_configuration() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    h.handle
        .start(request(drill_clips(1), linear_config()))
        .await
        .unwrap();

    h.collect_until(|e| matches!(e, PracticeEvent::LoopCompleted { .. }))
        .await;
    h.handle.pause().await.unwrap();
    assert_eq!(
        h.handle.snapshot().await.unwrap().paused_from,
        Some(SchedulerState::GapBetweenRepeats)
    );

    let invalid = PracticeConfiguration {
        global_repeats: 0,
        ..linear_config()
    };
    assert!(h.handle.resume(Some(invalid)).await.is_err());
    assert_eq!(h.handle.snapshot().await.unwrap().state, SchedulerState::Paused);

    let slower = PracticeConfiguration {
        min_speed: 0.5,
        max_speed: 1.0,
        ..linear_config()
    };
    h.handle.resume(Some(slower)).await.unwrap();
    h.collect_until_stopped().await;

    let rates: Vec<i32> = h
        .probe
        .played_ranges()
        .into_iter()
        .map(|(_, _, r)| hundredths(r))
        .collect();
    assert_eq!(rates, vec![80, 100]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_saved_session_continues_position() {
    let store = Arc::new(MemorySessionStore::new());
    let clips = drill_clips(3);
    let c1 = clips[1].id;

    let mut saved = PracticeSession::create(
        &clips,
        SessionKey::new(PACK_ID, TRACK_ID, SET_ID),
        &linear_config(),
    );
    saved.current_clip_index = 1;
    saved.current_loop_count = 1;
    store.save(&mut saved).await.unwrap();

    let mut h = Harness::spawn(store.clone());
    let mut req = request(clips, linear_config());
    req.resume = store
        .load(&SessionKey::new(PACK_ID, TRACK_ID, SET_ID))
        .await
        .unwrap();
    let session_id = h.handle.start(req).await.unwrap();
    assert_eq!(session_id, saved.id);

    let events = h
        .collect_until(|e| matches!(e, PracticeEvent::LoopCompleted { .. }))
        .await;
    assert_eq!(
        steps(&events),
        vec![
            Step::Started,
            Step::Clip(c1),
            Step::Speed(120),
            Step::Loop(c1, 1),
        ]
    );
    assert_eq!(h.probe.played_ranges()[0].0, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_resume_rejects_foreign_session() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    let clips = drill_clips(2);
    let foreign = PracticeSession::create(
        &clips,
        SessionKey::new(PACK_ID, TRACK_ID, "other-set"),
        &linear_config(),
    );

    let mut req = request(clips, linear_config());
    req.resume = Some(foreign);
    let err = h.handle.start(req).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Playback(PlaybackError::SessionMismatch { .. })
    ));
    assert!(h.probe.calls().is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_time_updates_stay_inside_clip() {
    let mut h = Harness::spawn(Arc::new(MemorySessionStore::new()));
    let clips = drill_clips(2);
    h.handle.start(request(clips, linear_config())).await.unwrap();

    let events = h.collect_until_stopped().await;
    let updates: Vec<(u64, u64, u64)> = events
        .iter()
        .filter_map(|e| match e {
            PracticeEvent::TimeUpdate {
                track_time_ms,
                clip_start_ms,
                clip_end_ms,
                ..
            } => Some((*track_time_ms, *clip_start_ms, *clip_end_ms)),
            _ => None,
        })
        .collect();

    assert!(!updates.is_empty());
    for (t, start, end) in updates {
        assert!(t >= start && t <= end, "{} outside {}-{}", t, start, end);
    }
}

#[tokio::test(start_paused = true)]
async fn test_forever_mode_toggle_persists() {
    let store = Arc::new(MemorySessionStore::new());
    let h = Harness::spawn(store.clone());
    h.handle
        .start(request(drill_clips(1), linear_config()))
        .await
        .unwrap();

    h.handle.set_forever_mode(true).await.unwrap();
    let saved = store
        .load(&SessionKey::new(PACK_ID, TRACK_ID, SET_ID))
        .await
        .unwrap()
        .unwrap();
    assert!(saved.forever_mode);
    assert!(h.handle.snapshot().await.unwrap().forever_mode);
}
