//! Per-query scratch state.
//!
//! Each query builds its own [`QueryScratch`] and drops it when done, so
//! concurrent queries never share counters and querier ids never need to be
//! stamped on the KeyFrames themselves.

use std::collections::HashMap;

use crate::atlas::map::KeyFrameId;

/// Purpose of a query, used to label its scratch state in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Loop,
    Merge,
    PlaceRecognition,
    Relocalization,
}

/// Transient counters of one KeyFrame within one query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScratchEntry {
    /// Number of query words this KeyFrame shares.
    pub shared_words: usize,
    /// Similarity to the query, once scored.
    pub score: Option<f64>,
}

/// KeyFrames sharing words with one query, in first-seen order.
#[derive(Debug)]
pub struct QueryScratch {
    kind: QueryKind,
    entries: HashMap<KeyFrameId, ScratchEntry>,
    sharing: Vec<KeyFrameId>,
}

impl QueryScratch {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            sharing: Vec::new(),
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Count one more shared word for `kf_id`, registering it on first sight.
    pub fn tag(&mut self, kf_id: KeyFrameId) {
        let sharing = &mut self.sharing;
        let entry = self.entries.entry(kf_id).or_insert_with(|| {
            sharing.push(kf_id);
            ScratchEntry::default()
        });
        entry.shared_words += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.sharing.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sharing.len()
    }

    /// Sharing KeyFrames in the order they were first seen.
    pub fn sharing(&self) -> &[KeyFrameId] {
        &self.sharing
    }

    pub fn entry(&self, kf_id: KeyFrameId) -> Option<&ScratchEntry> {
        self.entries.get(&kf_id)
    }

    /// Shared-word count, 0 for KeyFrames never tagged in this query.
    pub fn shared_words(&self, kf_id: KeyFrameId) -> usize {
        self.entries.get(&kf_id).map_or(0, |e| e.shared_words)
    }

    /// Highest shared-word count among sharing KeyFrames.
    pub fn max_shared_words(&self) -> usize {
        self.entries.values().map(|e| e.shared_words).max().unwrap_or(0)
    }

    /// Record the similarity score of a tagged KeyFrame.
    pub fn set_score(&mut self, kf_id: KeyFrameId, score: f64) {
        if let Some(entry) = self.entries.get_mut(&kf_id) {
            entry.score = Some(score);
        }
    }

    /// Score of a KeyFrame tagged and scored in this query.
    pub fn score(&self, kf_id: KeyFrameId) -> Option<f64> {
        self.entries.get(&kf_id).and_then(|e| e.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_counts_and_keeps_first_seen_order() {
        let mut scratch = QueryScratch::new(QueryKind::Loop);
        scratch.tag(KeyFrameId::new(5));
        scratch.tag(KeyFrameId::new(2));
        scratch.tag(KeyFrameId::new(5));

        assert_eq!(scratch.sharing(), &[KeyFrameId::new(5), KeyFrameId::new(2)]);
        assert_eq!(scratch.shared_words(KeyFrameId::new(5)), 2);
        assert_eq!(scratch.shared_words(KeyFrameId::new(2)), 1);
        assert_eq!(scratch.shared_words(KeyFrameId::new(9)), 0);
        assert_eq!(scratch.max_shared_words(), 2);
        assert_eq!(scratch.len(), 2);
        assert_eq!(scratch.kind(), QueryKind::Loop);
    }

    #[test]
    fn test_scores_only_for_tagged_keyframes() {
        let mut scratch = QueryScratch::new(QueryKind::Relocalization);
        scratch.tag(KeyFrameId::new(1));
        scratch.set_score(KeyFrameId::new(1), 0.4);
        scratch.set_score(KeyFrameId::new(2), 0.9);

        assert_eq!(scratch.score(KeyFrameId::new(1)), Some(0.4));
        assert_eq!(scratch.score(KeyFrameId::new(2)), None);
        assert!(scratch.entry(KeyFrameId::new(2)).is_none());
    }

    #[test]
    fn test_empty_scratch() {
        let scratch = QueryScratch::new(QueryKind::Merge);
        assert!(scratch.is_empty());
        assert_eq!(scratch.max_shared_words(), 0);
    }
}
