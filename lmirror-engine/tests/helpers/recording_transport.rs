//! Transport spy with fault injection
//!
//! Delegates real timing to `SimulatedTransport` (so ranges finish on the
//! paused tokio clock) and records every call for later assertions.

use async_trait::async_trait;
use lmirror_common::models::Track;
use lmirror_engine::error::TransportError;
use lmirror_engine::transport::{AudioTransport, SegmentId, SimulatedTransport, TransportEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Load(String),
    PlayRange {
        segment: SegmentId,
        start_ms: u64,
        end_ms: u64,
        rate: f32,
    },
    Pause,
    Resume,
    Stop,
}

#[derive(Default)]
struct ProbeState {
    calls: Vec<TransportCall>,
    fail_load: Option<TransportError>,
    fail_play: Option<TransportError>,
}

/// Test-side view of a `RecordingTransport`
#[derive(Clone, Default)]
pub struct TransportProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl TransportProbe {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// `(start_ms, end_ms, rate)` of every `play_range`, in order
    pub fn played_ranges(&self) -> Vec<(u64, u64, f32)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::PlayRange {
                    start_ms,
                    end_ms,
                    rate,
                    ..
                } => Some((start_ms, end_ms, rate)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_load(&self, error: TransportError) {
        self.state.lock().unwrap().fail_load = Some(error);
    }

    pub fn fail_next_play(&self, error: TransportError) {
        self.state.lock().unwrap().fail_play = Some(error);
    }
}

pub struct RecordingTransport {
    inner: SimulatedTransport,
    probe: TransportProbe,
}

impl RecordingTransport {
    pub fn new() -> (Self, TransportProbe, mpsc::UnboundedReceiver<TransportEvent>) {
        let (inner, rx) = SimulatedTransport::new(None, Duration::from_millis(100));
        let probe = TransportProbe::default();
        (
            Self {
                inner,
                probe: probe.clone(),
            },
            probe,
            rx,
        )
    }

    fn record(&self, call: TransportCall) {
        self.probe.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl AudioTransport for RecordingTransport {
    async fn load(&mut self, track: &Track) -> Result<(), TransportError> {
        self.record(TransportCall::Load(track.id.clone()));
        let fault = self.probe.state.lock().unwrap().fail_load.take();
        if let Some(error) = fault {
            return Err(error);
        }
        self.inner.load(track).await
    }

    async fn play_range(
        &mut self,
        segment: SegmentId,
        start_ms: u64,
        end_ms: u64,
        rate: f32,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::PlayRange {
            segment,
            start_ms,
            end_ms,
            rate,
        });
        let fault = self.probe.state.lock().unwrap().fail_play.take();
        if let Some(error) = fault {
            return Err(error);
        }
        self.inner.play_range(segment, start_ms, end_ms, rate).await
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Pause);
        self.inner.pause().await
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Resume);
        self.inner.resume().await
    }

    async fn stop(&mut self) {
        self.record(TransportCall::Stop);
        self.inner.stop().await
    }
}
