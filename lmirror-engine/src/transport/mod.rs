//! Audio transport abstraction
//!
//! The scheduler treats "play this track from t0 to t1 at rate r" as one
//! atomic capability. Decoding and mixing live behind this trait.
//!
//! Every `play_range` call carries a segment token. Notifications echo the
//! token, and the scheduler drops any whose token is not the one it issued
//! last, so a late end-of-range from a cancelled segment can never advance
//! playback.

pub mod simulated;

pub use simulated::SimulatedTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use lmirror_common::models::Track;

/// Token identifying one `play_range` call
pub type SegmentId = u64;

/// Notifications from the transport to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Periodic position report while a segment plays
    Tick {
        segment: SegmentId,
        position_ms: u64,
    },

    /// Playback reached `end_ms` of the segment
    RangeFinished { segment: SegmentId },

    /// Playback failed mid-segment
    Failed {
        segment: SegmentId,
        error: TransportError,
    },
}

impl TransportEvent {
    pub fn segment(&self) -> SegmentId {
        match self {
            TransportEvent::Tick { segment, .. }
            | TransportEvent::RangeFinished { segment }
            | TransportEvent::Failed { segment, .. } => *segment,
        }
    }
}

/// Playback capability driven by the scheduler
///
/// Implementations report progress through the event channel they were
/// constructed with.
#[async_trait]
pub trait AudioTransport: Send {
    /// Open the track's audio file
    async fn load(&mut self, track: &Track) -> Result<(), TransportError>;

    /// Play `[start_ms, end_ms)` of the loaded track at `rate`
    ///
    /// Replaces whatever segment was playing.
    async fn play_range(
        &mut self,
        segment: SegmentId,
        start_ms: u64,
        end_ms: u64,
        rate: f32,
    ) -> Result<(), TransportError>;

    /// Suspend the current segment, keeping its position
    async fn pause(&mut self) -> Result<(), TransportError>;

    /// Continue a paused segment
    async fn resume(&mut self) -> Result<(), TransportError>;

    /// Stop and forget the current segment
    async fn stop(&mut self);
}
