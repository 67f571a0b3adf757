//! KeyFrame - a selected frame as seen by place recognition.
//!
//! For the keyframe database a KeyFrame is:
//! - a Bag-of-Words signature (computed externally)
//! - the Map it currently belongs to
//! - its edges in the covisibility graph
//! - a "bad" flag set when the keyframe is culled
//!
//! The covisibility graph connects KeyFrames that share MapPoint observations.
//! Edge weights are maintained by the mapping side; here they are only read.

use std::collections::{HashMap, HashSet};

use crate::vocabulary::BowVector;

use super::types::{KeyFrameId, MapId};

/// A KeyFrame in the SLAM map.
#[derive(Clone)]
pub struct KeyFrame {
    /// Unique identifier for this KeyFrame.
    pub id: KeyFrameId,

    /// Map this KeyFrame currently belongs to.
    ///
    /// Changes when maps are merged.
    pub map_id: MapId,

    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,

    /// Bag-of-Words vector, None until the vocabulary transform ran.
    ///
    /// Set once: the keyframe database erases a KeyFrame using this vector,
    /// so it must not change while the KeyFrame is indexed.
    bow_vector: Option<BowVector>,

    // ─────────────────────────────────────────────────────────────────────────
    // Covisibility Graph
    // ─────────────────────────────────────────────────────────────────────────
    /// Covisibility weights: connected KeyFrame → number of shared MapPoints.
    covisibility_weights: HashMap<KeyFrameId, usize>,

    /// Covisible KeyFrames ordered best first (ties by ascending id).
    ordered_covisibles: Vec<(KeyFrameId, usize)>,

    /// Whether this KeyFrame is marked as bad (to be removed).
    pub is_bad: bool,
}

impl KeyFrame {
    /// Create a new KeyFrame without BoW vector or covisibility edges.
    pub fn new(id: KeyFrameId, map_id: MapId, timestamp_ns: u64) -> Self {
        Self {
            id,
            map_id,
            timestamp_ns,
            bow_vector: None,
            covisibility_weights: HashMap::new(),
            ordered_covisibles: Vec::new(),
            is_bad: false,
        }
    }

    /// Builder-style variant of [`KeyFrame::set_bow_vector`].
    pub fn with_bow_vector(mut self, bow: BowVector) -> Self {
        self.bow_vector = Some(bow);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bag-of-Words accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Set the Bag-of-Words vector for this keyframe.
    ///
    /// The caller is responsible for computing the BoW representation using
    /// a vocabulary. A vector that is already set is never replaced; returns
    /// false in that case.
    pub fn set_bow_vector(&mut self, bow: BowVector) -> bool {
        if self.bow_vector.is_some() {
            return false;
        }
        self.bow_vector = Some(bow);
        true
    }

    /// Get a reference to the Bag-of-Words vector, if available.
    pub fn bow_vector(&self) -> Option<&BowVector> {
        self.bow_vector.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Covisibility Graph
    // ─────────────────────────────────────────────────────────────────────────

    /// Add or update a covisibility connection.
    ///
    /// # Arguments
    /// * `kf_id` - The connected KeyFrame
    /// * `weight` - Number of shared MapPoints
    pub fn add_covisibility(&mut self, kf_id: KeyFrameId, weight: usize) {
        if kf_id == self.id {
            return; // Don't connect to self
        }
        self.covisibility_weights.insert(kf_id, weight);
        self.rebuild_ordered_covisibles();
    }

    /// Remove a covisibility connection.
    pub fn erase_covisibility(&mut self, kf_id: KeyFrameId) {
        if self.covisibility_weights.remove(&kf_id).is_some() {
            self.rebuild_ordered_covisibles();
        }
    }

    /// Get the covisibility weight with another KeyFrame.
    pub fn get_covisibility_weight(&self, kf_id: KeyFrameId) -> usize {
        self.covisibility_weights.get(&kf_id).copied().unwrap_or(0)
    }

    /// All KeyFrames connected in the covisibility graph.
    pub fn connected_keyframes(&self) -> HashSet<KeyFrameId> {
        self.covisibility_weights.keys().copied().collect()
    }

    /// Get the N best covisible KeyFrames (most shared points first).
    pub fn best_covisibles(&self, n: usize) -> Vec<KeyFrameId> {
        self.ordered_covisibles
            .iter()
            .take(n)
            .map(|(id, _)| *id)
            .collect()
    }

    fn rebuild_ordered_covisibles(&mut self) {
        self.ordered_covisibles = self
            .covisibility_weights
            .iter()
            .map(|(id, w)| (*id, *w))
            .collect();
        // Descending by weight, ascending id on ties to stay deterministic
        self.ordered_covisibles
            .sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark this KeyFrame as bad.
    pub fn set_bad(&mut self) {
        self.is_bad = true;
    }
}

impl std::fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("map_id", &self.map_id)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("num_words", &self.bow_vector.as_ref().map_or(0, |b| b.len()))
            .field("covisibles", &self.covisibility_weights.len())
            .field("is_bad", &self.is_bad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_keyframe(id: u64) -> KeyFrame {
        KeyFrame::new(KeyFrameId::new(id), MapId::new(0), 1_000_000 * id)
    }

    #[test]
    fn test_covisibility_graph() {
        let mut kf = create_test_keyframe(1);

        kf.add_covisibility(KeyFrameId::new(2), 50);
        kf.add_covisibility(KeyFrameId::new(3), 100);
        kf.add_covisibility(KeyFrameId::new(4), 25);

        assert_eq!(kf.get_covisibility_weight(KeyFrameId::new(2)), 50);
        assert_eq!(kf.get_covisibility_weight(KeyFrameId::new(5)), 0); // Not connected

        let best = kf.best_covisibles(2);
        assert_eq!(best, vec![KeyFrameId::new(3), KeyFrameId::new(2)]);

        assert_eq!(kf.connected_keyframes().len(), 3);
    }

    #[test]
    fn test_covisibility_ties_are_ordered_by_id() {
        let mut kf = create_test_keyframe(1);
        kf.add_covisibility(KeyFrameId::new(9), 10);
        kf.add_covisibility(KeyFrameId::new(4), 10);
        kf.add_covisibility(KeyFrameId::new(6), 10);

        assert_eq!(
            kf.best_covisibles(10),
            vec![KeyFrameId::new(4), KeyFrameId::new(6), KeyFrameId::new(9)]
        );
    }

    #[test]
    fn test_covisibility_update_and_erase() {
        let mut kf = create_test_keyframe(1);
        kf.add_covisibility(KeyFrameId::new(2), 5);
        kf.add_covisibility(KeyFrameId::new(3), 10);
        kf.add_covisibility(KeyFrameId::new(2), 20);

        assert_eq!(kf.best_covisibles(1), vec![KeyFrameId::new(2)]);

        kf.erase_covisibility(KeyFrameId::new(2));
        assert_eq!(kf.best_covisibles(10), vec![KeyFrameId::new(3)]);
        assert!(!kf.connected_keyframes().contains(&KeyFrameId::new(2)));
    }

    #[test]
    fn test_covisibility_no_self_connection() {
        let mut kf = create_test_keyframe(1);
        kf.add_covisibility(KeyFrameId::new(1), 100);
        assert_eq!(kf.get_covisibility_weight(KeyFrameId::new(1)), 0);
        assert!(kf.best_covisibles(10).is_empty());
    }

    #[test]
    fn test_bow_vector_accessors() {
        let mut kf = create_test_keyframe(1);
        assert!(kf.bow_vector().is_none());

        let mut bow = BowVector::new();
        bow.insert(3, 1.0);
        assert!(kf.set_bow_vector(bow.clone()));
        assert_eq!(kf.bow_vector(), Some(&bow));

        // The signature is fixed once set
        let mut other = BowVector::new();
        other.insert(8, 1.0);
        assert!(!kf.set_bow_vector(other));
        assert_eq!(kf.bow_vector(), Some(&bow));

        let kf2 = create_test_keyframe(2).with_bow_vector(bow);
        assert_eq!(kf2.bow_vector().map(|b| b.len()), Some(1));
    }
}
