//! # LanguageMirror Practice Engine (lmirror-engine)
//!
//! Drives clip-based listening drills: plays each drill clip of a track a
//! configured number of times, with gaps and a per-repeat speed curve,
//! persisting progress so a run can resume where it left off.
//!
//! **Architecture:** a single scheduler task owns all playback state and
//! talks to an `AudioTransport`; progress goes to a `SessionStore`
//! (SQLite via sqlx) before observers hear about it on the `EventBus`.

pub mod config;
pub mod db;
pub mod editor;
pub mod error;
pub mod scheduler;
pub mod session_store;
pub mod transport;

pub use error::{Error, Result};
pub use scheduler::{PlaybackScheduler, SchedulerHandle, SchedulerSnapshot, StartRequest};
