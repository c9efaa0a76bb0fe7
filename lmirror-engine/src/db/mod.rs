//! Database access layer
//!
//! Provides queries for practice sessions and settings. Schema creation
//! lives in `lmirror_common::db`.

pub mod retry;
pub mod sessions;
pub mod settings;
