//! Inverted index: visual word -> KeyFrames exhibiting that word.
//!
//! Plain data structure, no locking. The database wraps it in a mutex.

use serde::{Deserialize, Serialize};

use crate::atlas::map::KeyFrameId;
use crate::vocabulary::BowVector;

/// One slot per visual word, each an insertion-ordered list of KeyFrame ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    slots: Vec<Vec<KeyFrameId>>,
}

impl InvertedIndex {
    /// Create an empty index with `num_words` slots.
    pub fn with_words(num_words: usize) -> Self {
        Self {
            slots: vec![Vec::new(); num_words],
        }
    }

    /// Number of word slots.
    pub fn num_words(&self) -> usize {
        self.slots.len()
    }

    /// Total number of (word, KeyFrame) entries.
    pub fn num_entries(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// KeyFrames currently listed under `word`, in insertion order.
    pub fn keyframes_with_word(&self, word: u32) -> &[KeyFrameId] {
        self.slots
            .get(word as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append `kf_id` to the slot of every word in `bow`.
    ///
    /// No duplicate check: inserting the same KeyFrame twice lists it twice.
    /// Words beyond the slot range are skipped; returns how many were.
    pub fn insert(&mut self, kf_id: KeyFrameId, bow: &BowVector) -> usize {
        let mut skipped = 0;
        for &word in bow.keys() {
            match self.slots.get_mut(word as usize) {
                Some(slot) => slot.push(kf_id),
                None => skipped += 1,
            }
        }
        skipped
    }

    /// Remove the first occurrence of `kf_id` from the slot of every word in `bow`.
    pub fn remove(&mut self, kf_id: KeyFrameId, bow: &BowVector) {
        for &word in bow.keys() {
            let Some(slot) = self.slots.get_mut(word as usize) else {
                continue;
            };
            if let Some(pos) = slot.iter().position(|&id| id == kf_id) {
                slot.remove(pos);
            }
        }
    }

    /// Empty every slot and resize to `num_words`.
    pub fn reset(&mut self, num_words: usize) {
        self.slots.clear();
        self.slots.resize(num_words, Vec::new());
    }

    /// Keep only the entries for which `keep` returns true, preserving order.
    ///
    /// Returns the number of entries removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(KeyFrameId) -> bool,
    {
        let mut removed = 0;
        for slot in &mut self.slots {
            let before = slot.len();
            slot.retain(|&id| keep(id));
            removed += before - slot.len();
        }
        removed
    }

    /// Raw access to the slots, one per word.
    pub fn slots(&self) -> &[Vec<KeyFrameId>] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bow(words: &[u32]) -> BowVector {
        words.iter().map(|&w| (w, 1.0)).collect()
    }

    fn kf(id: u64) -> KeyFrameId {
        KeyFrameId::new(id)
    }

    #[test]
    fn test_insert_appends_in_order() {
        let mut index = InvertedIndex::with_words(4);
        index.insert(kf(1), &bow(&[0, 2]));
        index.insert(kf(2), &bow(&[2, 3]));

        assert_eq!(index.keyframes_with_word(0), &[kf(1)]);
        assert_eq!(index.keyframes_with_word(2), &[kf(1), kf(2)]);
        assert_eq!(index.keyframes_with_word(3), &[kf(2)]);
        assert!(index.keyframes_with_word(1).is_empty());
        assert_eq!(index.num_entries(), 4);
    }

    #[test]
    fn test_insert_twice_duplicates() {
        let mut index = InvertedIndex::with_words(2);
        index.insert(kf(1), &bow(&[1]));
        index.insert(kf(1), &bow(&[1]));
        assert_eq!(index.keyframes_with_word(1), &[kf(1), kf(1)]);

        // One remove only drops the first occurrence
        index.remove(kf(1), &bow(&[1]));
        assert_eq!(index.keyframes_with_word(1), &[kf(1)]);
    }

    #[test]
    fn test_out_of_range_words_are_skipped() {
        let mut index = InvertedIndex::with_words(2);
        let skipped = index.insert(kf(1), &bow(&[1, 5, 9]));
        assert_eq!(skipped, 2);
        assert_eq!(index.num_entries(), 1);
        assert!(index.keyframes_with_word(5).is_empty());

        // Removing with out-of-range words must not panic either
        index.remove(kf(1), &bow(&[1, 5]));
        assert_eq!(index.num_entries(), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut index = InvertedIndex::with_words(3);
        index.insert(kf(1), &bow(&[0, 1]));
        index.remove(kf(7), &bow(&[0, 1]));
        assert_eq!(index.num_entries(), 2);
    }

    #[test]
    fn test_reset_resizes() {
        let mut index = InvertedIndex::with_words(3);
        index.insert(kf(1), &bow(&[0, 1, 2]));
        index.reset(8);
        assert_eq!(index.num_words(), 8);
        assert_eq!(index.num_entries(), 0);
    }

    #[test]
    fn test_retain_preserves_order() {
        let mut index = InvertedIndex::with_words(1);
        for id in 0..6 {
            index.insert(kf(id), &bow(&[0]));
        }
        let removed = index.retain(|id| id.0 % 2 == 0);
        assert_eq!(removed, 3);
        assert_eq!(index.keyframes_with_word(0), &[kf(0), kf(2), kf(4)]);
    }

    proptest! {
        #[test]
        fn prop_insert_lists_each_keyframe_once_per_word(
            signatures in prop::collection::vec(prop::collection::btree_set(0u32..32, 1..8), 1..12)
        ) {
            let mut index = InvertedIndex::with_words(32);
            for (i, words) in signatures.iter().enumerate() {
                let bow: BowVector = words.iter().map(|&w| (w, 1.0)).collect();
                index.insert(kf(i as u64), &bow);
            }

            for (i, words) in signatures.iter().enumerate() {
                for word in 0..32u32 {
                    let count = index
                        .keyframes_with_word(word)
                        .iter()
                        .filter(|&&id| id == kf(i as u64))
                        .count();
                    prop_assert_eq!(count, usize::from(words.contains(&word)));
                }
            }
        }

        #[test]
        fn prop_remove_clears_every_word(
            signatures in prop::collection::vec(prop::collection::btree_set(0u32..16, 1..6), 2..10),
            victim in 0usize..10,
        ) {
            let victim = victim % signatures.len();
            let mut index = InvertedIndex::with_words(16);
            let bows: Vec<BowVector> = signatures
                .iter()
                .map(|words| words.iter().map(|&w| (w, 1.0)).collect())
                .collect();
            for (i, bow) in bows.iter().enumerate() {
                index.insert(kf(i as u64), bow);
            }

            index.remove(kf(victim as u64), &bows[victim]);

            for slot in index.slots() {
                prop_assert!(!slot.contains(&kf(victim as u64)));
            }
            let expected: usize = bows.iter().map(|b| b.len()).sum::<usize>() - bows[victim].len();
            prop_assert_eq!(index.num_entries(), expected);
        }
    }
}
