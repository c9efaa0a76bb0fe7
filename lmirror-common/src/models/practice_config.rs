//! Practice configuration captured for one run

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Clip;
use crate::speed_curves::{SpeedBounds, SpeedMode};
use crate::{Error, Result};

/// Longest accepted repeat or clip gap
pub const MAX_GAP_SECONDS: f64 = 3600.0;

/// Longest accepted pre-roll
pub const MAX_PREROLL_MS: u64 = 60_000;

/// Repeat, gap and speed settings for a practice run
///
/// The scheduler captures a copy at `start()` and on `resume()`; it never
/// reads settings storage while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeConfiguration {
    /// Repeats per clip unless the clip overrides it (>= 1)
    pub global_repeats: u32,
    /// Silence between repeats of the same clip
    pub gap_seconds: f64,
    /// Silence between successive clips
    pub inter_clip_gap_seconds: f64,
    /// Silence before the first repeat of a run
    pub preroll_ms: u64,
    pub min_speed: f32,
    pub max_speed: f32,
    pub speed_mode: SpeedMode,
    /// Threshold for the hybrid speed modes
    pub speed_mode_n: u32,
}

impl Default for PracticeConfiguration {
    fn default() -> Self {
        Self {
            global_repeats: 3,
            gap_seconds: 0.5,
            inter_clip_gap_seconds: 1.0,
            preroll_ms: 300,
            min_speed: 0.8,
            max_speed: 1.0,
            speed_mode: SpeedMode::ConstantMin,
            speed_mode_n: 2,
        }
    }
}

impl PracticeConfiguration {
    pub fn validate(&self) -> Result<()> {
        if self.global_repeats < 1 {
            return Err(Error::InvalidInput(
                "global_repeats must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("gap_seconds", self.gap_seconds),
            ("inter_clip_gap_seconds", self.inter_clip_gap_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
            if value > MAX_GAP_SECONDS {
                return Err(Error::InvalidInput(format!(
                    "{} must be at most {} seconds, got {}",
                    name, MAX_GAP_SECONDS, value
                )));
            }
        }
        if self.preroll_ms > MAX_PREROLL_MS {
            return Err(Error::InvalidInput(format!(
                "preroll_ms must be at most {}, got {}",
                MAX_PREROLL_MS, self.preroll_ms
            )));
        }
        for (name, value) in [("min_speed", self.min_speed), ("max_speed", self.max_speed)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if self.min_speed > self.max_speed {
            return Err(Error::InvalidInput(format!(
                "min_speed ({}) exceeds max_speed ({})",
                self.min_speed, self.max_speed
            )));
        }
        Ok(())
    }

    /// Repeats planned for a clip (override or global, never below 1)
    pub fn repeats_for(&self, clip: &Clip) -> u32 {
        clip.repeats.unwrap_or(self.global_repeats).max(1)
    }

    /// Effective speed bounds for a clip
    pub fn bounds_for(&self, clip: &Clip) -> SpeedBounds {
        SpeedBounds::with_overrides(
            self.min_speed,
            self.max_speed,
            clip.start_speed,
            clip.end_speed,
        )
    }

    /// Playback rate for repeat `loop_index` of `clip`
    pub fn speed_for(&self, clip: &Clip, loop_index: u32) -> f32 {
        self.speed_mode.speed_for(
            loop_index,
            self.repeats_for(clip),
            self.bounds_for(clip),
            self.speed_mode_n,
        )
    }

    pub fn repeat_gap(&self) -> Duration {
        crate::time::seconds_to_duration(self.gap_seconds)
    }

    pub fn inter_clip_gap(&self) -> Duration {
        crate::time::seconds_to_duration(self.inter_clip_gap_seconds)
    }

    pub fn preroll(&self) -> Duration {
        crate::time::millis_to_duration(self.preroll_ms)
    }
}
