//! Clip list editing
//!
//! `ClipListEditor` keeps a working copy of a practice set's clips apart
//! from the last committed baseline. Every successful operation returns the
//! new list together with a `ClipEdit` describing what changed structurally;
//! hand both to the scheduler so it can keep its current clip by identity.
//!
//! A failed operation leaves the working list exactly as it was.

use crate::error::EditError;
use lmirror_common::models::{Clip, ClipId, ClipKind, PracticeSet};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Minimum distance between a split point and either clip boundary
pub const MIN_SPLIT_MARGIN_MS: u64 = 500;

/// Structural change produced by one edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClipEdit {
    /// `original` kept the left half; `right` is the new right half
    Split { original: ClipId, right: ClipId },
    /// `removed` was absorbed by the clip before it
    Merged { removed: ClipId, into: ClipId },
    KindChanged { clip: ClipId, kind: ClipKind },
    Added { clip: ClipId },
    Deleted { clip: ClipId },
    /// Repeats or speed overrides changed; ranges untouched
    Updated { clip: ClipId },
    /// Working copy replaced by the baseline
    Reverted,
}

/// Result of a successful edit
#[derive(Debug, Clone)]
pub struct EditOutcome {
    /// Full working list after the edit
    pub clips: Vec<Clip>,
    pub edit: ClipEdit,
}

/// Working copy of a practice set's clips
#[derive(Debug, Clone)]
pub struct ClipListEditor {
    practice_set_id: String,
    track_id: String,
    title: String,
    baseline: Vec<Clip>,
    working: Vec<Clip>,
    edit_count: u32,
}

impl ClipListEditor {
    pub fn new(set: &PracticeSet) -> Self {
        Self {
            practice_set_id: set.id.clone(),
            track_id: set.track_id.clone(),
            title: set.title.clone(),
            baseline: set.clips.clone(),
            working: set.clips.clone(),
            edit_count: 0,
        }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.working
    }

    pub fn baseline(&self) -> &[Clip] {
        &self.baseline
    }

    pub fn practice_set_id(&self) -> &str {
        &self.practice_set_id
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.edit_count > 0
    }

    /// Number of edits since the last commit or discard
    pub fn unsaved_change_count(&self) -> u32 {
        self.edit_count
    }

    /// Split a clip in two at `at_ms`
    ///
    /// The left half keeps the original id; the right half gets a new id.
    /// Both halves keep kind, repeats and speed overrides.
    pub fn split(&mut self, clip_id: ClipId, at_ms: u64) -> Result<EditOutcome, EditError> {
        let index = self.index_of(clip_id)?;
        let clip = &self.working[index];

        if at_ms <= clip.start_ms.saturating_add(MIN_SPLIT_MARGIN_MS)
            || at_ms >= clip.end_ms.saturating_sub(MIN_SPLIT_MARGIN_MS)
        {
            return Err(EditError::OutOfRange {
                at_ms,
                start_ms: clip.start_ms,
                end_ms: clip.end_ms,
            });
        }

        let right = Clip {
            id: Uuid::new_v4(),
            start_ms: at_ms,
            ..clip.clone()
        };
        let right_id = right.id;

        self.working[index].end_ms = at_ms;
        self.working.insert(index + 1, right);

        debug!(clip_id = %clip_id, at_ms, right_id = %right_id, "Split clip");
        Ok(self.record(ClipEdit::Split {
            original: clip_id,
            right: right_id,
        }))
    }

    /// Merge the clip at `clip_index` into the clip before it
    ///
    /// The earlier clip extends to cover both ranges and keeps its id and
    /// metadata; the later clip is removed.
    pub fn merge(&mut self, clip_index: usize) -> Result<EditOutcome, EditError> {
        self.check_index(clip_index)?;
        if clip_index == 0 {
            return Err(EditError::NoPreviousClip);
        }

        let removed = self.working.remove(clip_index);
        let into = &mut self.working[clip_index - 1];
        into.start_ms = into.start_ms.min(removed.start_ms);
        into.end_ms = into.end_ms.max(removed.end_ms);
        let into_id = into.id;

        debug!(removed = %removed.id, into = %into_id, "Merged clip");
        Ok(self.record(ClipEdit::Merged {
            removed: removed.id,
            into: into_id,
        }))
    }

    pub fn set_kind(&mut self, clip_index: usize, kind: ClipKind) -> Result<EditOutcome, EditError> {
        self.check_index(clip_index)?;
        let clip = &mut self.working[clip_index];
        clip.kind = kind;
        let clip_id = clip.id;
        Ok(self.record(ClipEdit::KindChanged {
            clip: clip_id,
            kind,
        }))
    }

    /// drill → skip → noise → drill
    pub fn cycle_kind(&mut self, clip_index: usize) -> Result<EditOutcome, EditError> {
        self.check_index(clip_index)?;
        let next = self.working[clip_index].kind.next();
        self.set_kind(clip_index, next)
    }

    /// Insert a new clip in start order
    pub fn add_clip(
        &mut self,
        start_ms: u64,
        end_ms: u64,
        kind: ClipKind,
    ) -> Result<EditOutcome, EditError> {
        if end_ms <= start_ms {
            return Err(EditError::InvalidRange { start_ms, end_ms });
        }
        if let Some(existing) = self
            .working
            .iter()
            .find(|c| start_ms < c.end_ms && c.start_ms < end_ms)
        {
            return Err(EditError::Overlap {
                start_ms,
                end_ms,
                existing: existing.id,
            });
        }

        let clip = Clip::new(start_ms, end_ms, kind);
        let clip_id = clip.id;
        let position = self
            .working
            .iter()
            .position(|c| c.start_ms > start_ms)
            .unwrap_or(self.working.len());
        self.working.insert(position, clip);

        Ok(self.record(ClipEdit::Added { clip: clip_id }))
    }

    pub fn delete(&mut self, clip_index: usize) -> Result<EditOutcome, EditError> {
        self.check_index(clip_index)?;
        let removed = self.working.remove(clip_index);
        Ok(self.record(ClipEdit::Deleted { clip: removed.id }))
    }

    /// Per-clip repeat override (`None` = global setting)
    pub fn set_repeats(
        &mut self,
        clip_index: usize,
        repeats: Option<u32>,
    ) -> Result<EditOutcome, EditError> {
        self.check_index(clip_index)?;
        let clip = &mut self.working[clip_index];
        clip.repeats = repeats.map(|r| r.max(1));
        let clip_id = clip.id;
        Ok(self.record(ClipEdit::Updated { clip: clip_id }))
    }

    /// Per-clip speed bounds (`None` = global setting)
    pub fn set_speed_overrides(
        &mut self,
        clip_index: usize,
        start_speed: Option<f32>,
        end_speed: Option<f32>,
    ) -> Result<EditOutcome, EditError> {
        self.check_index(clip_index)?;
        for speed in [start_speed, end_speed].into_iter().flatten() {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(EditError::InvalidSpeed(speed.to_string()));
            }
        }

        let clip = &mut self.working[clip_index];
        clip.start_speed = start_speed;
        clip.end_speed = end_speed;
        let clip_id = clip.id;
        Ok(self.record(ClipEdit::Updated { clip: clip_id }))
    }

    /// Throw away every edit since the last commit
    pub fn discard(&mut self) -> EditOutcome {
        self.working = self.baseline.clone();
        self.edit_count = 0;
        EditOutcome {
            clips: self.working.clone(),
            edit: ClipEdit::Reverted,
        }
    }

    /// Adopt the working copy as the practice set's clips
    pub fn commit_update(&mut self) -> PracticeSet {
        self.baseline = self.working.clone();
        self.edit_count = 0;
        self.to_practice_set()
    }

    /// Save the working copy as a new practice set
    ///
    /// Clip ids carry over so play counts stay meaningful. The editor is
    /// bound to the new set afterwards.
    pub fn commit_as_new(&mut self, title: impl Into<String>) -> PracticeSet {
        self.practice_set_id = Uuid::new_v4().to_string();
        self.title = title.into();
        self.commit_update()
    }

    fn to_practice_set(&self) -> PracticeSet {
        PracticeSet {
            id: self.practice_set_id.clone(),
            track_id: self.track_id.clone(),
            title: self.title.clone(),
            clips: self.working.clone(),
        }
    }

    fn record(&mut self, edit: ClipEdit) -> EditOutcome {
        self.edit_count += 1;
        EditOutcome {
            clips: self.working.clone(),
            edit,
        }
    }

    fn index_of(&self, clip_id: ClipId) -> Result<usize, EditError> {
        self.working
            .iter()
            .position(|c| c.id == clip_id)
            .ok_or(EditError::ClipNotFound(clip_id))
    }

    fn check_index(&self, clip_index: usize) -> Result<(), EditError> {
        if clip_index < self.working.len() {
            Ok(())
        } else {
            Err(EditError::ClipIndexOutOfRange {
                index: clip_index,
                len: self.working.len(),
            })
        }
    }
}
