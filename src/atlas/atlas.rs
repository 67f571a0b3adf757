//! Atlas - multi-map container and KeyFrame registry.
//!
//! The Atlas owns:
//! - every KeyFrame, in an arena keyed by [`KeyFrameId`]
//! - one or more `Map` instances, one of them **active**
//! - the shared `KeyFrameDatabase` used for place recognition
//!
//! The database only stores ids and resolves them through the Atlas
//! (see [`KeyFrameSource`]), so removing a KeyFrame from the arena can never
//! leave the database holding a dangling reference.

use std::collections::HashMap;
use std::sync::Arc;

use crate::vocabulary::{BowVector, Vocabulary};

use super::keyframe_db::{KeyFrameDatabase, KeyFrameSource};
use super::map::{KeyFrame, KeyFrameId, Map, MapId};

/// Top‑level multi‑map container, mirroring ORB‑SLAM3's Atlas.
pub struct Atlas {
    /// All maps managed by the Atlas, `maps[i].id == MapId(i)`.
    maps: Vec<Map>,
    /// Index of the active map inside `maps`.
    active_map_idx: usize,
    /// KeyFrame arena.
    keyframes: HashMap<KeyFrameId, KeyFrame>,
    /// Next KeyFrame id to hand out. Ids are never reused.
    next_kf_id: u64,
    /// Shared keyframe database for place recognition.
    pub keyframe_db: KeyFrameDatabase,
}

impl Atlas {
    /// Create a new Atlas with a single empty active map.
    pub fn new(vocabulary: Arc<dyn Vocabulary>) -> Self {
        Self::with_database(KeyFrameDatabase::new(vocabulary))
    }

    /// Create a new Atlas around an existing (e.g. loaded) database.
    pub fn with_database(keyframe_db: KeyFrameDatabase) -> Self {
        Self {
            maps: vec![Map::new(MapId::new(0))],
            active_map_idx: 0,
            keyframes: HashMap::new(),
            next_kf_id: 0,
            keyframe_db,
        }
    }

    /// Number of maps in the Atlas (including bad ones).
    pub fn num_maps(&self) -> usize {
        self.maps.len()
    }

    /// Id of the active map.
    pub fn active_map_id(&self) -> MapId {
        self.maps[self.active_map_idx].id
    }

    /// Immutable reference to the active map.
    pub fn active_map(&self) -> &Map {
        &self.maps[self.active_map_idx]
    }

    /// Look up a map by id.
    pub fn get_map(&self, id: MapId) -> Option<&Map> {
        self.maps.get(id.0 as usize)
    }

    /// All maps.
    pub fn all_maps(&self) -> &[Map] {
        &self.maps
    }

    /// Create a new empty map and make it the active map.
    pub fn create_new_map(&mut self) -> MapId {
        let id = MapId::new(self.maps.len() as u64);
        self.maps.push(Map::new(id));
        self.active_map_idx = self.maps.len() - 1;
        tracing::info!("Created {} (now active)", id);
        id
    }

    /// Set the active map.
    ///
    /// Panics if `id` does not name a map of this Atlas.
    pub fn set_active_map(&mut self, id: MapId) {
        assert!((id.0 as usize) < self.maps.len(), "active map index out of range");
        self.active_map_idx = id.0 as usize;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // KeyFrames
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a KeyFrame in the active map.
    ///
    /// The KeyFrame is not inserted in the database; call
    /// [`Atlas::register_in_database`] once its covisibility is set up.
    pub fn create_keyframe(&mut self, timestamp_ns: u64, bow: BowVector) -> KeyFrameId {
        let id = KeyFrameId::new(self.next_kf_id);
        self.next_kf_id += 1;

        let map_id = self.active_map_id();
        let kf = KeyFrame::new(id, map_id, timestamp_ns).with_bow_vector(bow);
        self.keyframes.insert(id, kf);
        self.maps[self.active_map_idx].add_keyframe(id);
        id
    }

    pub fn get_keyframe(&self, id: KeyFrameId) -> Option<&KeyFrame> {
        self.keyframes.get(&id)
    }

    pub fn get_keyframe_mut(&mut self, id: KeyFrameId) -> Option<&mut KeyFrame> {
        self.keyframes.get_mut(&id)
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    /// Add a symmetric covisibility edge between two KeyFrames.
    ///
    /// Returns false if either KeyFrame is unknown.
    pub fn connect_keyframes(&mut self, a: KeyFrameId, b: KeyFrameId, weight: usize) -> bool {
        if a == b || !self.keyframes.contains_key(&a) || !self.keyframes.contains_key(&b) {
            return false;
        }
        if let Some(kf) = self.keyframes.get_mut(&a) {
            kf.add_covisibility(b, weight);
        }
        if let Some(kf) = self.keyframes.get_mut(&b) {
            kf.add_covisibility(a, weight);
        }
        true
    }

    /// Insert a KeyFrame in the place recognition database.
    pub fn register_in_database(&self, id: KeyFrameId) -> bool {
        match self.keyframes.get(&id) {
            Some(kf) => {
                self.keyframe_db.add(kf);
                true
            }
            None => false,
        }
    }

    /// Remove a KeyFrame from the database, its map, its neighbors' edges
    /// and finally the arena.
    pub fn remove_keyframe(&mut self, id: KeyFrameId) -> Option<KeyFrame> {
        let mut kf = self.keyframes.remove(&id)?;
        self.keyframe_db.erase(&kf);

        if let Some(map) = self.maps.get_mut(kf.map_id.0 as usize) {
            map.remove_keyframe(id);
        }
        for neighbor in kf.connected_keyframes() {
            if let Some(other) = self.keyframes.get_mut(&neighbor) {
                other.erase_covisibility(id);
            }
        }
        kf.set_bad();
        Some(kf)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map management
    // ─────────────────────────────────────────────────────────────────────────

    /// Move every KeyFrame of `from` into `into` and mark `from` bad.
    ///
    /// Returns the number of KeyFrames moved.
    pub fn merge_maps(&mut self, from: MapId, into: MapId) -> usize {
        let (from_idx, into_idx) = (from.0 as usize, into.0 as usize);
        if from == into || from_idx >= self.maps.len() || into_idx >= self.maps.len() {
            return 0;
        }

        let moved: Vec<KeyFrameId> = self.maps[from_idx].keyframe_ids().copied().collect();
        for id in &moved {
            if let Some(kf) = self.keyframes.get_mut(id) {
                kf.map_id = into;
            }
            self.maps[from_idx].remove_keyframe(*id);
            self.maps[into_idx].add_keyframe(*id);
        }
        self.maps[from_idx].set_bad();

        tracing::info!("Merged {} into {} ({} keyframes)", from, into, moved.len());
        moved.len()
    }

    /// Discard a map: mark it bad and drop its KeyFrames from the database.
    ///
    /// The KeyFrames stay in the arena; only place recognition forgets them.
    pub fn discard_map(&mut self, id: MapId) {
        let Some(map) = self.maps.get_mut(id.0 as usize) else {
            return;
        };
        map.set_bad();
        self.keyframe_db.clear_map(id, &*self);
        tracing::info!("Discarded {}", id);
    }
}

impl KeyFrameSource for Atlas {
    fn keyframe(&self, id: KeyFrameId) -> Option<&KeyFrame> {
        self.keyframes.get(&id)
    }

    fn map(&self, id: MapId) -> Option<&Map> {
        self.maps.get(id.0 as usize)
    }
}
