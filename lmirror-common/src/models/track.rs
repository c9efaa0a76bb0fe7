//! Catalog-side records the engine reads

use serde::{Deserialize, Serialize};

use super::Clip;

/// Track metadata supplied by the library/catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub pack_id: String,
    /// Audio file name, relative to the root folder
    pub filename: String,
    pub duration_ms: u64,
}

/// A named, ordered clip list for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSet {
    pub id: String,
    pub track_id: String,
    #[serde(default)]
    pub title: String,
    pub clips: Vec<Clip>,
}
