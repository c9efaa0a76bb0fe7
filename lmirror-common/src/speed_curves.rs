//! Speed progression curves for looped drilling
//!
//! Maps a repeat number within a clip visit to a playback rate. Five modes
//! are supported:
//! - ConstantMin: every repeat at the lower bound
//! - ConstantMax: every repeat at the upper bound
//! - Linear: ramp from lower to upper bound across all planned repeats
//! - MinThenLinear: hold the lower bound for N repeats, then ramp to the upper bound
//! - LinearThenMax: ramp to the upper bound over N repeats, then hold it
//!
//! Whatever the mode arithmetic yields, the result is clamped into the bounds.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Playback rate bounds for one clip
///
/// `min <= max` always holds; the constructors reorder swapped inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedBounds {
    pub min: f32,
    pub max: f32,
}

impl SpeedBounds {
    pub fn new(a: f32, b: f32) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// Build bounds from global settings with optional per-clip overrides
    ///
    /// Each override replaces its global counterpart independently.
    pub fn with_overrides(
        global_min: f32,
        global_max: f32,
        start_speed: Option<f32>,
        end_speed: Option<f32>,
    ) -> Self {
        Self::new(
            start_speed.unwrap_or(global_min),
            end_speed.unwrap_or(global_max),
        )
    }

    /// Interpolate between the bounds (`t` is clamped to 0.0..=1.0)
    pub fn lerp(&self, t: f32) -> f32 {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        self.min + (self.max - self.min) * t
    }

    pub fn clamp(&self, speed: f32) -> f32 {
        if speed.is_nan() {
            return self.min;
        }
        speed.clamp(self.min, self.max)
    }
}

/// Speed progression strategy across the repeats of one clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    /// Always play at the lower bound
    ConstantMin,

    /// Always play at the upper bound
    ConstantMax,

    /// Lower bound on the first repeat, upper bound on the last
    Linear,

    /// Lower bound for the first N repeats, then a ramp ending at the upper bound
    MinThenLinear,

    /// Ramp reaching the upper bound after N repeats, upper bound afterwards
    LinearThenMax,
}

impl SpeedMode {
    /// Calculate the playback rate for one repeat
    ///
    /// # Arguments
    /// * `loop_index` - Zero-based repeat number within the current clip visit
    /// * `total_loops` - Number of repeats planned for the clip
    /// * `bounds` - Effective bounds (global or per-clip override)
    /// * `mode_n` - Threshold used by the two hybrid modes
    ///
    /// `mode_n` is clamped to the planned repeat count, so a clip with fewer
    /// repeats than the threshold still finishes its ramp on its final repeat.
    pub fn speed_for(
        &self,
        loop_index: u32,
        total_loops: u32,
        bounds: SpeedBounds,
        mode_n: u32,
    ) -> f32 {
        let total = total_loops.max(1);
        let last = total - 1;

        let raw = match self {
            SpeedMode::ConstantMin => bounds.min,
            SpeedMode::ConstantMax => bounds.max,
            SpeedMode::Linear => {
                if last == 0 {
                    bounds.min
                } else {
                    bounds.lerp(loop_index as f32 / last as f32)
                }
            }
            SpeedMode::MinThenLinear => {
                let n = mode_n.min(last);
                if loop_index < n {
                    bounds.min
                } else if last == n {
                    // Only the final repeat remains after the hold
                    bounds.max
                } else {
                    bounds.lerp((loop_index - n) as f32 / (last - n) as f32)
                }
            }
            SpeedMode::LinearThenMax => {
                let n = mode_n.min(total);
                if n == 0 || loop_index >= n {
                    bounds.max
                } else if n == 1 {
                    bounds.min
                } else {
                    bounds.lerp(loop_index as f32 / (n - 1) as f32)
                }
            }
        };

        bounds.clamp(raw)
    }

    /// Convert to settings string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            SpeedMode::ConstantMin => "constant_min",
            SpeedMode::ConstantMax => "constant_max",
            SpeedMode::Linear => "linear",
            SpeedMode::MinThenLinear => "min_then_linear",
            SpeedMode::LinearThenMax => "linear_then_max",
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            SpeedMode::ConstantMin => "Constant (slowest)",
            SpeedMode::ConstantMax => "Constant (fastest)",
            SpeedMode::Linear => "Linear ramp",
            SpeedMode::MinThenLinear => "Hold slow, then ramp",
            SpeedMode::LinearThenMax => "Ramp, then hold fast",
        }
    }

    /// Whether `mode_n` has any effect for this mode
    pub fn uses_threshold(&self) -> bool {
        matches!(self, SpeedMode::MinThenLinear | SpeedMode::LinearThenMax)
    }

    /// Get all available speed modes
    ///
    /// Useful for settings pickers and validation
    pub fn all_variants() -> &'static [SpeedMode] {
        &[
            SpeedMode::ConstantMin,
            SpeedMode::ConstantMax,
            SpeedMode::Linear,
            SpeedMode::MinThenLinear,
            SpeedMode::LinearThenMax,
        ]
    }
}

impl Default for SpeedMode {
    fn default() -> Self {
        SpeedMode::ConstantMin
    }
}

impl FromStr for SpeedMode {
    type Err = String;

    /// Parse from settings text
    ///
    /// Accepts the snake_case settings form as well as the camelCase form
    /// used by exported app settings (`minThenLinear`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "constantmin" => Ok(SpeedMode::ConstantMin),
            "constantmax" => Ok(SpeedMode::ConstantMax),
            "linear" => Ok(SpeedMode::Linear),
            "minthenlinear" => Ok(SpeedMode::MinThenLinear),
            "linearthenmax" => Ok(SpeedMode::LinearThenMax),
            _ => Err(format!("Unknown speed mode: {}", s)),
        }
    }
}

impl std::fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
