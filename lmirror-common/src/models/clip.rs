//! Clips: time-bounded slices of a track

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Stable clip identity, independent of list position
pub type ClipId = Uuid;

/// What a clip is used for during practice
///
/// Only `Drill` clips are scheduled; the other kinds are display markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    Drill,
    Skip,
    Noise,
}

impl ClipKind {
    /// Next kind in the editor's tap-to-cycle order (drill → skip → noise → drill)
    pub fn next(&self) -> ClipKind {
        match self {
            ClipKind::Drill => ClipKind::Skip,
            ClipKind::Skip => ClipKind::Noise,
            ClipKind::Noise => ClipKind::Drill,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClipKind::Drill => "drill",
            ClipKind::Skip => "skip",
            ClipKind::Noise => "noise",
        }
    }
}

impl Default for ClipKind {
    fn default() -> Self {
        ClipKind::Drill
    }
}

impl std::fmt::Display for ClipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drill" => Ok(ClipKind::Drill),
            "skip" => Ok(ClipKind::Skip),
            "noise" => Ok(ClipKind::Noise),
            _ => Err(format!("Unknown clip kind: {}", s)),
        }
    }
}

/// A time-bounded slice of a track
///
/// Invariant: `end_ms > start_ms`. The editor never produces a clip that
/// violates it; the scheduler rejects lists that contain one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default)]
    pub kind: ClipKind,
    /// Per-clip repeat count; `None` uses the global setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<u32>,
    /// Per-clip lower speed bound; `None` uses the global setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_speed: Option<f32>,
    /// Per-clip upper speed bound; `None` uses the global setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_speed: Option<f32>,
}

impl Clip {
    /// Create a clip with a fresh identity and no overrides
    pub fn new(start_ms: u64, end_ms: u64, kind: ClipKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_ms,
            end_ms,
            kind,
            repeats: None,
            start_speed: None,
            end_speed: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn has_valid_range(&self) -> bool {
        self.end_ms > self.start_ms
    }

    /// Speed overrides, where present, are finite and positive
    pub fn has_valid_speeds(&self) -> bool {
        [self.start_speed, self.end_speed]
            .into_iter()
            .flatten()
            .all(|speed| speed.is_finite() && speed > 0.0)
    }

    pub fn is_drill(&self) -> bool {
        self.kind == ClipKind::Drill
    }

    /// Whether a track position falls inside this clip (end exclusive)
    pub fn contains_ms(&self, position_ms: u64) -> bool {
        position_ms >= self.start_ms && position_ms < self.end_ms
    }
}

/// Drill-kind clips of a list, in list order
pub fn drill_clips(clips: &[Clip]) -> Vec<&Clip> {
    clips.iter().filter(|c| c.is_drill()).collect()
}
