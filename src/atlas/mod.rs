//! Atlas module - multi-map structures and place recognition.
//!
//! - [`map`] - KeyFrames, Maps and their ids
//! - [`atlas`] - the Atlas container owning every KeyFrame
//! - [`keyframe_db`] - inverted-index keyframe database (loop closing,
//!   map merging and relocalization candidates)

pub mod atlas;
pub mod keyframe_db;
pub mod map;

// Re-export commonly used types
pub use atlas::Atlas;
pub use keyframe_db::{KeyFrameDatabase, KeyFrameDatabaseConfig, KeyFrameSource, PlaceCandidates};
pub use map::{KeyFrame, KeyFrameId, Map, MapId};
