//! Domain model shared by the engine and its collaborators
//!
//! These are the data structures the catalog, the editor UI and the practice
//! engine exchange. None of them perform I/O.

mod clip;
mod practice_config;
mod session;
mod track;

pub use clip::{drill_clips, Clip, ClipId, ClipKind};
pub use practice_config::{PracticeConfiguration, MAX_GAP_SECONDS, MAX_PREROLL_MS};
pub use session::{PracticeSession, RecentSession, SessionKey};
pub use track::{PracticeSet, Track};
