//! # LanguageMirror Common Library
//!
//! Shared code for the practice engine and its collaborators:
//! - Domain model (clips, tracks, practice configuration, sessions)
//! - Speed curve definitions and calculations
//! - Event types (PracticeEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - Database bootstrap

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod speed_curves;
pub mod time;

pub use error::{Error, Result};
pub use speed_curves::{SpeedBounds, SpeedMode};
