//! Map - a connected sub-map of the Atlas.
//!
//! KeyFrames themselves live in the Atlas arena; a Map only records which
//! KeyFrames belong to it and whether it has been discarded.

use std::collections::BTreeSet;

use super::types::{KeyFrameId, MapId};

/// A single map inside the Atlas.
pub struct Map {
    /// Unique identifier of this map.
    pub id: MapId,

    /// KeyFrames currently belonging to this map.
    keyframe_ids: BTreeSet<KeyFrameId>,

    /// Set when the map is discarded (e.g. after a failed initialization
    /// or once merged into another map).
    is_bad: bool,
}

impl Map {
    /// Create a new empty map.
    pub fn new(id: MapId) -> Self {
        Self {
            id,
            keyframe_ids: BTreeSet::new(),
            is_bad: false,
        }
    }

    /// Register a KeyFrame as belonging to this map.
    pub fn add_keyframe(&mut self, kf_id: KeyFrameId) {
        self.keyframe_ids.insert(kf_id);
    }

    /// Remove a KeyFrame from this map. Returns true if it was present.
    pub fn remove_keyframe(&mut self, kf_id: KeyFrameId) -> bool {
        self.keyframe_ids.remove(&kf_id)
    }

    pub fn contains_keyframe(&self, kf_id: KeyFrameId) -> bool {
        self.keyframe_ids.contains(&kf_id)
    }

    /// KeyFrame ids in ascending order.
    pub fn keyframe_ids(&self) -> impl Iterator<Item = &KeyFrameId> {
        self.keyframe_ids.iter()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframe_ids.len()
    }

    pub fn is_bad(&self) -> bool {
        self.is_bad
    }

    /// Mark this map as bad. Its KeyFrames stay registered until removed.
    pub fn set_bad(&mut self) {
        self.is_bad = true;
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("id", &self.id)
            .field("num_keyframes", &self.keyframe_ids.len())
            .field("is_bad", &self.is_bad)
            .finish()
    }
}
