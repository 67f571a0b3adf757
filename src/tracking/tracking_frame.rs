//! Tracking `Frame` representation.
//!
//! A `Frame` is a processed camera frame that has not (yet) become a
//! KeyFrame. When tracking is lost, its Bag-of-Words vector is matched
//! against the keyframe database to find relocalization candidates.
//!
//! Frames are never inserted in the database and never appear in the
//! covisibility graph.

use serde::{Deserialize, Serialize};

use crate::vocabulary::BowVector;

/// Identifier of a tracked Frame. Independent from KeyFrame ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// A tracked frame as seen by relocalization.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,

    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,

    /// Bag-of-Words vector, None until computed.
    pub bow_vector: Option<BowVector>,
}

impl Frame {
    pub fn new(id: FrameId, timestamp_ns: u64) -> Self {
        Self {
            id,
            timestamp_ns,
            bow_vector: None,
        }
    }

    pub fn with_bow_vector(mut self, bow: BowVector) -> Self {
        self.bow_vector = Some(bow);
        self
    }

    /// Get a reference to the Bag-of-Words vector, if available.
    pub fn bow_vector(&self) -> Option<&BowVector> {
        self.bow_vector.as_ref()
    }
}
