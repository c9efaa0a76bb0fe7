//! Persisted, resumable practice state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{drill_clips, Clip, ClipId, PracticeConfiguration};

/// Identity of the clip list a session tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub pack_id: String,
    pub track_id: String,
    pub practice_set_id: String,
}

impl SessionKey {
    pub fn new(
        pack_id: impl Into<String>,
        track_id: impl Into<String>,
        practice_set_id: impl Into<String>,
    ) -> Self {
        Self {
            pack_id: pack_id.into(),
            track_id: track_id.into(),
            practice_set_id: practice_set_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.pack_id, self.track_id, self.practice_set_id)
    }
}

/// Resumable practice position for one (pack, track, practice set)
///
/// `current_clip_index` is a position in the drill-filtered clip list.
/// `clip_play_counts` is keyed by clip id so it survives reordering and
/// splitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: Uuid,
    pub pack_id: String,
    pub track_id: String,
    pub practice_set_id: String,
    pub current_clip_index: usize,
    /// Completed repeats of the current clip in the current visit
    pub current_loop_count: u32,
    pub current_speed: f32,
    pub clip_play_counts: BTreeMap<ClipId, u32>,
    pub forever_mode: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl PracticeSession {
    /// Fresh session at the first drill clip
    ///
    /// The starting speed is what the configured mode yields for the first
    /// repeat of the first drill clip (the global lower bound when the list
    /// has no drill clips).
    pub fn create(clips: &[Clip], key: SessionKey, config: &PracticeConfiguration) -> Self {
        let starting_speed = drill_clips(clips)
            .first()
            .map(|clip| config.speed_for(clip, 0))
            .unwrap_or(config.min_speed);
        let now = crate::time::now();

        Self {
            id: Uuid::new_v4(),
            pack_id: key.pack_id,
            track_id: key.track_id,
            practice_set_id: key.practice_set_id,
            current_clip_index: 0,
            current_loop_count: 0,
            current_speed: starting_speed,
            clip_play_counts: BTreeMap::new(),
            forever_mode: false,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(
            self.pack_id.clone(),
            self.track_id.clone(),
            self.practice_set_id.clone(),
        )
    }

    pub fn is_bound_to(&self, key: &SessionKey) -> bool {
        self.pack_id == key.pack_id
            && self.track_id == key.track_id
            && self.practice_set_id == key.practice_set_id
    }

    /// Count one completed repeat of `clip_id`, returning the new total
    pub fn record_completed_repeat(&mut self, clip_id: ClipId) -> u32 {
        let count = self.clip_play_counts.entry(clip_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn play_count(&self, clip_id: &ClipId) -> u32 {
        self.clip_play_counts.get(clip_id).copied().unwrap_or(0)
    }

    /// Keep the index inside `0..max(1, drill_len)`
    ///
    /// Returns true when the index had to move.
    pub fn clamp_index(&mut self, drill_len: usize) -> bool {
        let limit = drill_len.max(1);
        if self.current_clip_index >= limit {
            self.current_clip_index = if drill_len == 0 { 0 } else { drill_len - 1 };
            true
        } else {
            false
        }
    }

    /// Start a session for a newly saved practice set
    ///
    /// The practice-set binding of an existing session never changes, so
    /// "save as new" produces a separate session. Play counts carry over
    /// because the new set's clips keep their ids.
    pub fn rebind_to_practice_set(&self, practice_set_id: impl Into<String>) -> Self {
        let now = crate::time::now();
        Self {
            id: Uuid::new_v4(),
            pack_id: self.pack_id.clone(),
            track_id: self.track_id.clone(),
            practice_set_id: practice_set_id.into(),
            current_clip_index: 0,
            current_loop_count: 0,
            current_speed: self.current_speed,
            clip_play_counts: self.clip_play_counts.clone(),
            forever_mode: self.forever_mode,
            created_at: now,
            last_updated_at: now,
        }
    }
}

/// Row of the "recent sessions" listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSession {
    pub pack_id: String,
    pub track_id: String,
    pub practice_set_id: String,
    pub last_updated_at: DateTime<Utc>,
}
