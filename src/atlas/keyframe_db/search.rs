//! Candidate search kernel shared by every query.
//!
//! A query runs in five phases:
//! 1. **Gather** (index locked): tag every KeyFrame sharing a word with the
//!    query and count the shared words, routing it into one of two buckets.
//! 2. **Common-word filter**: keep KeyFrames sharing more than
//!    `ratio * max_shared_words` words (optionally more than a floor).
//! 3. **Score**: vocabulary similarity between the query and the KeyFrame.
//! 4. **Covisibility accumulation**: add the scores of the KeyFrame's best
//!    covisible neighbors scored in the same pass; the best scoring member
//!    of the group represents it.
//! 5. **Retain / rank**: threshold against the best accumulated score, or
//!    sort, then drop repeated representatives.
//!
//! Only phase 1 needs the index lock. Phases 2-5 resolve ids through a
//! [`KeyFrameSource`] and skip ids that no longer resolve.

use std::collections::HashSet;

use crate::atlas::map::KeyFrameId;
use crate::vocabulary::{BowVector, Vocabulary};

use super::config::KeyFrameDatabaseConfig;
use super::inverted_index::InvertedIndex;
use super::query::{QueryKind, QueryScratch};
use super::KeyFrameSource;

/// Which scratch a gathered KeyFrame is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Primary,
    Secondary,
}

/// Result of the gather phase.
#[derive(Debug)]
pub struct Gathered {
    pub primary: QueryScratch,
    pub secondary: QueryScratch,
}

/// Tag every KeyFrame sharing a word with `query`.
///
/// `route` is called on every occurrence of a KeyFrame in the index and
/// decides its bucket; `None` excludes that occurrence.
pub fn gather<F>(
    index: &InvertedIndex,
    query: &BowVector,
    kinds: (QueryKind, QueryKind),
    mut route: F,
) -> Gathered
where
    F: FnMut(KeyFrameId) -> Option<Bucket>,
{
    let mut gathered = Gathered {
        primary: QueryScratch::new(kinds.0),
        secondary: QueryScratch::new(kinds.1),
    };

    for &word in query.keys() {
        for &kf_id in index.keyframes_with_word(word) {
            match route(kf_id) {
                Some(Bucket::Primary) => gathered.primary.tag(kf_id),
                Some(Bucket::Secondary) => gathered.secondary.tag(kf_id),
                None => {}
            }
        }
    }

    gathered
}

/// Per-query thresholds on top of the database config.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams<'a> {
    pub config: &'a KeyFrameDatabaseConfig,
    /// Seeds must score at least this much; also the initial best
    /// accumulated score. `None` means no floor.
    pub min_score: Option<f64>,
    /// Lower bound on the common-word threshold (0 = none).
    pub min_common_words: usize,
}

/// A candidate group: accumulated score and its representative KeyFrame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulated {
    pub score: f64,
    pub keyframe: KeyFrameId,
}

/// Output of the accumulation phase.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// One entry per seed, in seed order.
    pub matches: Vec<Accumulated>,
    /// Highest accumulated score (or the min score if higher).
    pub best_score: f64,
}

impl Ranking {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Groups scoring strictly above `ratio * best_score`, first occurrence
    /// of each representative only.
    pub fn retained(&self, ratio: f64) -> Vec<Accumulated> {
        let threshold = ratio * self.best_score;
        let mut seen = HashSet::new();
        self.matches
            .iter()
            .filter(|m| m.score > threshold)
            .filter(|m| seen.insert(m.keyframe))
            .copied()
            .collect()
    }

    /// All groups by descending accumulated score.
    ///
    /// The sort is stable so equal scores keep seed order.
    pub fn into_sorted(mut self) -> Vec<Accumulated> {
        self.matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.matches
    }
}

/// Phases 2-4: filter by common words, score, accumulate by covisibility.
pub fn accumulate<S>(
    scratch: &mut QueryScratch,
    query: &BowVector,
    vocabulary: &dyn Vocabulary,
    source: &S,
    params: &SearchParams<'_>,
) -> Ranking
where
    S: KeyFrameSource + ?Sized,
{
    if scratch.is_empty() {
        return Ranking::default();
    }

    let max_common = scratch.max_shared_words();
    let ratio_common = (max_common as f64 * params.config.min_common_words_ratio).floor() as usize;
    let min_common = ratio_common.max(params.min_common_words);

    let survivors: Vec<KeyFrameId> = scratch
        .sharing()
        .iter()
        .copied()
        .filter(|&id| scratch.shared_words(id) > min_common)
        .collect();

    let mut seeds = Vec::with_capacity(survivors.len());
    for kf_id in survivors {
        let Some(bow) = source.keyframe(kf_id).and_then(|kf| kf.bow_vector()) else {
            tracing::trace!("{:?} query: {} no longer resolves, skipped", scratch.kind(), kf_id);
            continue;
        };
        let score = vocabulary.score(query, bow);
        scratch.set_score(kf_id, score);
        if params.min_score.map_or(true, |min| score >= min) {
            seeds.push((score, kf_id));
        }
    }

    let mut ranking = Ranking {
        matches: Vec::with_capacity(seeds.len()),
        best_score: params.min_score.unwrap_or(0.0),
    };
    if seeds.is_empty() {
        return ranking;
    }

    for (score, kf_id) in seeds {
        let neighbors = source
            .keyframe(kf_id)
            .map(|kf| kf.best_covisibles(params.config.covisibility_neighbors))
            .unwrap_or_default();

        let mut best = score;
        let mut acc = score;
        let mut representative = kf_id;
        for neighbor in neighbors {
            // Only neighbors scored in this same pass contribute
            let Some(neighbor_score) = scratch.score(neighbor) else {
                continue;
            };
            acc += neighbor_score;
            if neighbor_score > best {
                best = neighbor_score;
                representative = neighbor;
            }
        }

        ranking.matches.push(Accumulated {
            score: acc,
            keyframe: representative,
        });
        if acc > ranking.best_score {
            ranking.best_score = acc;
        }
    }

    tracing::trace!(
        "{:?} query: {} sharing, min common words {}, {} groups, best {:.4}",
        scratch.kind(),
        scratch.len(),
        min_common,
        ranking.matches.len(),
        ranking.best_score
    );

    ranking
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use crate::atlas::atlas::Atlas;
    use crate::vocabulary::FlatVocabulary;

    fn bow(words: &[u32]) -> BowVector {
        words.iter().map(|&w| (w, 1.0 / words.len() as f64)).collect()
    }

    fn params(config: &KeyFrameDatabaseConfig) -> SearchParams<'_> {
        SearchParams {
            config,
            min_score: None,
            min_common_words: 0,
        }
    }

    /// Scenario: K1={0,1}, K2={1,2}, K3={0,2} indexed, query with K1's words.
    #[test]
    fn test_gather_counts_shared_words() {
        let mut index = InvertedIndex::with_words(5);
        let (k1, k2, k3) = (KeyFrameId::new(1), KeyFrameId::new(2), KeyFrameId::new(3));
        index.insert(k1, &bow(&[0, 1]));
        index.insert(k2, &bow(&[1, 2]));
        index.insert(k3, &bow(&[0, 2]));

        let gathered = gather(&index, &bow(&[0, 1]), (QueryKind::Loop, QueryKind::Merge), |id| {
            (id != k1).then_some(Bucket::Primary)
        });

        assert_eq!(gathered.primary.sharing(), &[k3, k2]);
        assert_eq!(gathered.primary.shared_words(k2), 1);
        assert_eq!(gathered.primary.shared_words(k3), 1);
        assert!(gathered.secondary.is_empty());
    }

    #[test]
    fn test_gather_without_exclusion_includes_all() {
        let mut index = InvertedIndex::with_words(5);
        let (k1, k2) = (KeyFrameId::new(1), KeyFrameId::new(2));
        index.insert(k1, &bow(&[0, 1]));
        index.insert(k2, &bow(&[1, 2]));

        let gathered = gather(&index, &bow(&[0, 1]), (QueryKind::Loop, QueryKind::Merge), |id| {
            Some(if id == k1 { Bucket::Primary } else { Bucket::Secondary })
        });

        assert_eq!(gathered.primary.shared_words(k1), 2);
        assert_eq!(gathered.secondary.shared_words(k2), 1);
    }

    #[test]
    fn test_gather_ignores_words_outside_index() {
        let index = InvertedIndex::with_words(2);
        let gathered = gather(&index, &bow(&[7, 8]), (QueryKind::Loop, QueryKind::Loop), |_| {
            Some(Bucket::Primary)
        });
        assert!(gathered.primary.is_empty());
    }

    /// Two covisible KeyFrames both matching the query form one group
    /// whose score is the sum and whose representative is the best one.
    #[test]
    fn test_accumulate_sums_covisible_neighbors() {
        let vocab = FlatVocabulary::new(8);
        let mut atlas = Atlas::new(Arc::new(vocab));
        let query = bow(&[0, 1, 2, 3]);
        let k5 = atlas.create_keyframe(0, bow(&[0, 1, 2, 4]));
        let k6 = atlas.create_keyframe(1, bow(&[0, 1, 2, 3]));
        atlas.connect_keyframes(k5, k6, 50);

        let mut scratch = QueryScratch::new(QueryKind::Loop);
        for _ in 0..4 {
            scratch.tag(k5);
            scratch.tag(k6);
        }

        let config = KeyFrameDatabaseConfig::default();
        let ranking = accumulate(&mut scratch, &query, &vocab, &atlas, &params(&config));

        let s5 = vocab.score(&query, &bow(&[0, 1, 2, 4]));
        let s6 = vocab.score(&query, &bow(&[0, 1, 2, 3]));
        assert!(s6 > s5);

        assert_eq!(ranking.matches.len(), 2);
        assert_relative_eq!(ranking.matches[0].score, s5 + s6, epsilon = 1e-12);
        assert_eq!(ranking.matches[0].keyframe, k6);
        assert_relative_eq!(ranking.matches[1].score, s5 + s6, epsilon = 1e-12);
        assert_eq!(ranking.matches[1].keyframe, k6);
        assert_relative_eq!(ranking.best_score, s5 + s6, epsilon = 1e-12);

        // Both groups collapse onto the same representative
        assert_eq!(ranking.retained(0.75).len(), 1);
    }

    #[test]
    fn test_common_word_filter_drops_weak_overlap() {
        let vocab = FlatVocabulary::new(16);
        let mut atlas = Atlas::new(Arc::new(vocab));
        let strong = atlas.create_keyframe(0, bow(&[0, 1, 2, 3, 4]));
        let weak = atlas.create_keyframe(1, bow(&[0, 9]));

        let mut scratch = QueryScratch::new(QueryKind::Relocalization);
        for _ in 0..5 {
            scratch.tag(strong);
        }
        scratch.tag(weak);

        let config = KeyFrameDatabaseConfig::default();
        let query = bow(&[0, 1, 2, 3, 4]);
        let ranking = accumulate(&mut scratch, &query, &vocab, &atlas, &params(&config));

        // floor(0.8 * 5) = 4: only `strong` shares more than 4 words
        assert_eq!(ranking.matches.len(), 1);
        assert_eq!(ranking.matches[0].keyframe, strong);
        assert!(scratch.score(weak).is_none());
    }

    #[test]
    fn test_min_common_words_floor() {
        let vocab = FlatVocabulary::new(16);
        let mut atlas = Atlas::new(Arc::new(vocab));
        let a = atlas.create_keyframe(0, bow(&[0, 1]));

        let mut scratch = QueryScratch::new(QueryKind::PlaceRecognition);
        scratch.tag(a);
        scratch.tag(a);

        let config = KeyFrameDatabaseConfig::default();
        let mut p = params(&config);
        p.min_common_words = 2;
        let ranking = accumulate(&mut scratch, &bow(&[0, 1]), &vocab, &atlas, &p);
        assert!(ranking.is_empty());
    }

    #[test]
    fn test_min_score_blocks_seeds() {
        let vocab = FlatVocabulary::new(16);
        let mut atlas = Atlas::new(Arc::new(vocab));
        let a = atlas.create_keyframe(0, bow(&[0, 1, 5]));

        let mut scratch = QueryScratch::new(QueryKind::Loop);
        scratch.tag(a);
        scratch.tag(a);

        let config = KeyFrameDatabaseConfig::default();
        let mut p = params(&config);
        p.min_score = Some(0.9);
        let ranking = accumulate(&mut scratch, &bow(&[0, 1, 2]), &vocab, &atlas, &p);

        assert!(ranking.is_empty());
        assert_eq!(ranking.best_score, 0.9);
        // The score is still recorded for neighbor accumulation
        assert!(scratch.score(a).is_some());
    }

    #[test]
    fn test_unresolvable_keyframes_are_skipped() {
        let vocab = FlatVocabulary::new(16);
        let atlas = Atlas::new(Arc::new(vocab));

        let mut scratch = QueryScratch::new(QueryKind::Loop);
        scratch.tag(KeyFrameId::new(42));

        let config = KeyFrameDatabaseConfig::default();
        let ranking = accumulate(&mut scratch, &bow(&[0]), &vocab, &atlas, &params(&config));
        assert!(ranking.is_empty());
    }

    #[test]
    fn test_retained_threshold_is_strict() {
        let ranking = Ranking {
            matches: vec![
                Accumulated { score: 1.0, keyframe: KeyFrameId::new(1) },
                Accumulated { score: 0.75, keyframe: KeyFrameId::new(2) },
                Accumulated { score: 0.8, keyframe: KeyFrameId::new(1) },
                Accumulated { score: 0.9, keyframe: KeyFrameId::new(3) },
            ],
            best_score: 1.0,
        };

        let kept: Vec<_> = ranking.retained(0.75).iter().map(|m| m.keyframe).collect();
        assert_eq!(kept, vec![KeyFrameId::new(1), KeyFrameId::new(3)]);
    }

    #[test]
    fn test_into_sorted_is_stable_descending() {
        let ranking = Ranking {
            matches: vec![
                Accumulated { score: 0.5, keyframe: KeyFrameId::new(1) },
                Accumulated { score: 0.9, keyframe: KeyFrameId::new(2) },
                Accumulated { score: 0.5, keyframe: KeyFrameId::new(3) },
            ],
            best_score: 0.9,
        };

        let ids: Vec<_> = ranking.into_sorted().iter().map(|m| m.keyframe).collect();
        assert_eq!(ids, vec![KeyFrameId::new(2), KeyFrameId::new(1), KeyFrameId::new(3)]);
    }
}
