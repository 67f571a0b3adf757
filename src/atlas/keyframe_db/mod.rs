//! KeyFrameDatabase - inverted-index place recognition.
//!
//! The database maps every visual word to the KeyFrames exhibiting it and
//! answers five kinds of queries:
//! - loop candidates (same map)
//! - loop and merge candidates (same map / other maps)
//! - best candidates with a minimum number of shared words
//! - N best candidates, sorted
//! - relocalization candidates for a plain Frame
//!
//! KeyFrames are referenced by id only and resolved through a
//! [`KeyFrameSource`] (usually the Atlas) when scoring.
//!
//! # Locking
//!
//! One mutex guards the inverted index and the vocabulary handle. Queries
//! hold it only while gathering KeyFrames that share words with the query;
//! scoring and covisibility accumulation run unlocked.

pub mod config;
pub mod database;
pub mod error;
pub mod inverted_index;
pub mod persistence;
pub mod query;
pub mod search;

pub use config::KeyFrameDatabaseConfig;
pub use database::{KeyFrameDatabase, PlaceCandidates};
pub use error::DatabaseError;
pub use inverted_index::InvertedIndex;

use super::map::{KeyFrame, KeyFrameId, Map, MapId};

/// Read access to the KeyFrames and Maps referenced by the database.
pub trait KeyFrameSource {
    /// Resolve a KeyFrame id, None if it was removed.
    fn keyframe(&self, id: KeyFrameId) -> Option<&KeyFrame>;

    /// Resolve a Map id.
    fn map(&self, id: MapId) -> Option<&Map>;

    /// Unknown maps count as bad.
    fn is_map_bad(&self, id: MapId) -> bool {
        self.map(id).map_or(true, Map::is_bad)
    }
}
