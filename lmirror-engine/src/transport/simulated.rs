//! Wall-clock transport without an audio device
//!
//! Advances a virtual play head at `rate` track-milliseconds per
//! wall-clock millisecond using tokio timers. Drives the command-line
//! driver and the timer-based tests (which run on tokio's paused clock).

use super::{AudioTransport, SegmentId, TransportEvent};
use crate::error::TransportError;
use async_trait::async_trait;
use lmirror_common::models::Track;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct ActiveRange {
    segment: SegmentId,
    end_ms: u64,
    rate: f32,
}

/// Simulated audio transport
pub struct SimulatedTransport {
    root_folder: Option<PathBuf>,
    tick_interval: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    loaded: Option<Track>,
    active: Option<ActiveRange>,
    /// Play head in track milliseconds, shared with the playback task
    position_ms: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl SimulatedTransport {
    /// Create a transport and the receiver for its notifications
    ///
    /// With a `root_folder`, `load` fails with `FileMissing` unless
    /// `root_folder/filename` exists. Without one, any track loads.
    pub fn new(
        root_folder: Option<PathBuf>,
        tick_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            root_folder,
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            events,
            loaded: None,
            active: None,
            position_ms: Arc::new(AtomicU64::new(0)),
            task: None,
        };
        (transport, rx)
    }

    /// Current play head (track milliseconds)
    pub fn position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    pub fn loaded_track(&self) -> Option<&Track> {
        self.loaded.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn spawn_playback(&mut self, range: ActiveRange) {
        self.abort_task();

        let position = Arc::clone(&self.position_ms);
        let events = self.events.clone();
        let tick = self.tick_interval;

        self.task = Some(tokio::spawn(async move {
            run_range(range, position, events, tick).await;
        }));
    }
}

/// Advance the play head until `end_ms`, reporting ticks along the way
async fn run_range(
    range: ActiveRange,
    position: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TransportEvent>,
    tick: Duration,
) {
    let rate = range.rate.max(0.01) as f64;
    let mut last = Instant::now();

    loop {
        let pos = position.load(Ordering::Relaxed);
        if pos >= range.end_ms {
            break;
        }

        let remaining_wall =
            Duration::from_secs_f64((range.end_ms - pos) as f64 / rate / 1000.0);
        let reaches_end = remaining_wall <= tick;
        tokio::time::sleep(if reaches_end { remaining_wall } else { tick }).await;

        let now = Instant::now();
        let advanced = (now.duration_since(last).as_secs_f64() * 1000.0 * rate).round() as u64;
        last = now;

        let next = if reaches_end {
            range.end_ms
        } else {
            (pos + advanced).min(range.end_ms)
        };
        position.store(next, Ordering::Relaxed);

        if next >= range.end_ms {
            break;
        }
        if events
            .send(TransportEvent::Tick {
                segment: range.segment,
                position_ms: next,
            })
            .is_err()
        {
            return;
        }
    }

    let _ = events.send(TransportEvent::RangeFinished {
        segment: range.segment,
    });
}

#[async_trait]
impl AudioTransport for SimulatedTransport {
    async fn load(&mut self, track: &Track) -> Result<(), TransportError> {
        if let Some(root) = &self.root_folder {
            let path = root.join(&track.filename);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(TransportError::FileMissing(path.display().to_string()));
            }
        }

        self.abort_task();
        self.active = None;
        self.loaded = Some(track.clone());
        info!(track_id = %track.id, filename = %track.filename, "Loaded track");
        Ok(())
    }

    async fn play_range(
        &mut self,
        segment: SegmentId,
        start_ms: u64,
        end_ms: u64,
        rate: f32,
    ) -> Result<(), TransportError> {
        let track = self
            .loaded
            .as_ref()
            .ok_or_else(|| TransportError::PlaybackFailed("No track loaded".to_string()))?;

        if end_ms <= start_ms {
            return Err(TransportError::PlaybackFailed(format!(
                "Empty range {}-{} ms",
                start_ms, end_ms
            )));
        }
        if track.duration_ms > 0 && start_ms >= track.duration_ms {
            return Err(TransportError::PlaybackFailed(format!(
                "Range start {} ms beyond track end {} ms",
                start_ms, track.duration_ms
            )));
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(TransportError::PlaybackFailed(format!("Invalid rate {}", rate)));
        }

        debug!(segment, start_ms, end_ms, rate, "Playing range");
        self.position_ms.store(start_ms, Ordering::Relaxed);
        let range = ActiveRange {
            segment,
            end_ms,
            rate,
        };
        self.active = Some(range);
        self.spawn_playback(range);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.abort_task();
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        match self.active {
            Some(range) if self.task.is_none() => {
                self.spawn_playback(range);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(TransportError::PlaybackFailed(
                "Nothing to resume".to_string(),
            )),
        }
    }

    async fn stop(&mut self) {
        self.abort_task();
        self.active = None;
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.abort_task();
    }
}
