//! The keyframe database and its five candidate queries.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::atlas::map::{KeyFrame, KeyFrameId, MapId};
use crate::tracking::tracking_frame::Frame;
use crate::vocabulary::{BowVector, Vocabulary};

use super::config::KeyFrameDatabaseConfig;
use super::inverted_index::InvertedIndex;
use super::query::QueryKind;
use super::search::{self, Bucket, Gathered, SearchParams};
use super::KeyFrameSource;

/// Loop and merge candidates returned by the two-bucket queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceCandidates {
    /// Candidates in the same map as the query KeyFrame.
    pub loop_candidates: Vec<KeyFrameId>,
    /// Candidates in other (non-bad) maps.
    pub merge_candidates: Vec<KeyFrameId>,
}

impl PlaceCandidates {
    pub fn is_empty(&self) -> bool {
        self.loop_candidates.is_empty() && self.merge_candidates.is_empty()
    }
}

/// State guarded by the database mutex.
struct Inner {
    index: InvertedIndex,
    vocabulary: Arc<dyn Vocabulary>,
}

/// Inverted-index keyframe database.
///
/// All methods take `&self`; the database can be shared between the
/// tracking, local mapping and loop closing threads.
pub struct KeyFrameDatabase {
    inner: Mutex<Inner>,
    config: KeyFrameDatabaseConfig,
}

impl KeyFrameDatabase {
    /// Create an empty database sized to `vocabulary`.
    pub fn new(vocabulary: Arc<dyn Vocabulary>) -> Self {
        Self::with_config(vocabulary, KeyFrameDatabaseConfig::default())
    }

    pub fn with_config(vocabulary: Arc<dyn Vocabulary>, config: KeyFrameDatabaseConfig) -> Self {
        let index = InvertedIndex::with_words(vocabulary.size());
        Self::from_parts(index, vocabulary, config)
    }

    pub(super) fn from_parts(
        index: InvertedIndex,
        vocabulary: Arc<dyn Vocabulary>,
        config: KeyFrameDatabaseConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner { index, vocabulary }),
            config,
        }
    }

    pub fn config(&self) -> &KeyFrameDatabaseConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: KeyFrameDatabaseConfig) {
        self.config = config;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Index maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a KeyFrame under every word of its BoW vector.
    ///
    /// Each KeyFrame must be added at most once (until erased): adding it
    /// twice lists it twice. KeyFrames without a BoW vector are ignored.
    pub fn add(&self, kf: &KeyFrame) {
        let Some(bow) = kf.bow_vector() else {
            return;
        };

        let mut inner = self.inner.lock();
        let skipped = inner.index.insert(kf.id, bow);
        if skipped > 0 {
            tracing::warn!(
                "{}: {} words outside the {}-word index were skipped",
                kf.id,
                skipped,
                inner.index.num_words()
            );
        }
    }

    /// Remove a KeyFrame from every word of its BoW vector. No-op if absent.
    pub fn erase(&self, kf: &KeyFrame) {
        let Some(bow) = kf.bow_vector() else {
            return;
        };
        self.inner.lock().index.remove(kf.id, bow);
    }

    /// Empty the index and resize it to the current vocabulary.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let num_words = inner.vocabulary.size();
        inner.index.reset(num_words);
        tracing::info!("Keyframe database cleared ({} words)", num_words);
    }

    /// Remove every entry whose KeyFrame currently belongs to `map_id`.
    ///
    /// The KeyFrames themselves are untouched. Entries whose KeyFrame can
    /// no longer be resolved are kept.
    pub fn clear_map<S>(&self, map_id: MapId, source: &S)
    where
        S: KeyFrameSource + ?Sized,
    {
        let mut inner = self.inner.lock();
        let removed = inner
            .index
            .retain(|id| source.keyframe(id).map_or(true, |kf| kf.map_id != map_id));
        tracing::debug!("Cleared {} entries of {} from keyframe database", removed, map_id);
    }

    /// Swap the scoring vocabulary.
    ///
    /// With `clear_index` the index is emptied and resized to the new
    /// vocabulary. Otherwise it is left untouched: the caller must re-add
    /// KeyFrames whose BoW vectors were computed with the old vocabulary,
    /// and entries beyond a smaller vocabulary stay stale.
    pub fn set_vocabulary(&self, vocabulary: Arc<dyn Vocabulary>, clear_index: bool) {
        let mut inner = self.inner.lock();
        inner.vocabulary = vocabulary;

        let num_words = inner.vocabulary.size();
        if clear_index {
            inner.index.reset(num_words);
        } else if inner.index.num_words() != num_words {
            tracing::warn!(
                "Vocabulary has {} words but the index keeps {} slots",
                num_words,
                inner.index.num_words()
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// KeyFrames listed under `word`, in insertion order.
    pub fn keyframes_with_word(&self, word: u32) -> Vec<KeyFrameId> {
        self.inner.lock().index.keyframes_with_word(word).to_vec()
    }

    /// Number of word slots in the index.
    pub fn num_words(&self) -> usize {
        self.inner.lock().index.num_words()
    }

    /// Total number of (word, KeyFrame) entries.
    pub fn num_entries(&self) -> usize {
        self.inner.lock().index.num_entries()
    }

    /// Vocabulary currently used for scoring.
    pub fn vocabulary(&self) -> Arc<dyn Vocabulary> {
        Arc::clone(&self.inner.lock().vocabulary)
    }

    pub(super) fn snapshot_index(&self) -> InvertedIndex {
        self.inner.lock().index.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Loop candidates for `kf` in its own map.
    ///
    /// KeyFrames connected to `kf` are excluded. Only KeyFrames scoring at
    /// least `min_score` seed a candidate group; `min_score <= 0` means no
    /// floor.
    pub fn detect_loop_candidates<S>(&self, kf: &KeyFrame, min_score: f64, source: &S) -> Vec<KeyFrameId>
    where
        S: KeyFrameSource + ?Sized,
    {
        let Some(query) = non_empty_bow(kf.bow_vector()) else {
            return Vec::new();
        };
        let excluded = exclusion_set(kf);

        let (mut gathered, vocabulary) = self.gather(query, (QueryKind::Loop, QueryKind::Loop), |id| {
            if excluded.contains(&id) {
                return None;
            }
            let other = source.keyframe(id)?;
            (other.map_id == kf.map_id).then_some(Bucket::Primary)
        });
        if gathered.primary.is_empty() {
            return Vec::new();
        }

        let params = self.params(floor(min_score), 0);
        let ranking = search::accumulate(&mut gathered.primary, query, vocabulary.as_ref(), source, &params);
        let candidates: Vec<KeyFrameId> = ranking
            .retained(self.config.retain_score_ratio)
            .into_iter()
            .map(|m| m.keyframe)
            .collect();

        tracing::debug!(
            "{} loop query: {} sharing, {} candidates",
            kf.id,
            gathered.primary.len(),
            candidates.len()
        );
        candidates
    }

    /// Loop candidates (same map) and merge candidates (other non-bad maps).
    ///
    /// Each bucket is filtered, scored and accumulated independently:
    /// neighbors only contribute to groups of their own bucket.
    pub fn detect_candidates<S>(&self, kf: &KeyFrame, min_score: f64, source: &S) -> PlaceCandidates
    where
        S: KeyFrameSource + ?Sized,
    {
        let Some(query) = non_empty_bow(kf.bow_vector()) else {
            return PlaceCandidates::default();
        };
        let excluded = exclusion_set(kf);

        let (mut gathered, vocabulary) = self.gather(query, (QueryKind::Loop, QueryKind::Merge), |id| {
            if excluded.contains(&id) {
                return None;
            }
            let other = source.keyframe(id)?;
            if other.map_id == kf.map_id {
                Some(Bucket::Primary)
            } else if !source.is_map_bad(other.map_id) {
                Some(Bucket::Secondary)
            } else {
                None
            }
        });
        if gathered.primary.is_empty() && gathered.secondary.is_empty() {
            return PlaceCandidates::default();
        }

        let params = self.params(floor(min_score), 0);
        let ratio = self.config.retain_score_ratio;
        let mut candidates = PlaceCandidates::default();

        if !gathered.primary.is_empty() {
            let ranking = search::accumulate(&mut gathered.primary, query, vocabulary.as_ref(), source, &params);
            candidates.loop_candidates = ranking.retained(ratio).into_iter().map(|m| m.keyframe).collect();
        }
        if !gathered.secondary.is_empty() {
            let ranking = search::accumulate(&mut gathered.secondary, query, vocabulary.as_ref(), source, &params);
            candidates.merge_candidates = ranking.retained(ratio).into_iter().map(|m| m.keyframe).collect();
        }

        tracing::debug!(
            "{} loop/merge query: {}/{} sharing, {}/{} candidates",
            kf.id,
            gathered.primary.len(),
            gathered.secondary.len(),
            candidates.loop_candidates.len(),
            candidates.merge_candidates.len()
        );
        candidates
    }

    /// Place recognition candidates sharing more than `min_words` words.
    ///
    /// Candidates are split after ranking: representatives in the query's
    /// map are loop candidates, the others merge candidates.
    pub fn detect_best_candidates<S>(&self, kf: &KeyFrame, min_words: usize, source: &S) -> PlaceCandidates
    where
        S: KeyFrameSource + ?Sized,
    {
        let Some(query) = non_empty_bow(kf.bow_vector()) else {
            return PlaceCandidates::default();
        };
        let excluded = exclusion_set(kf);

        let (mut gathered, vocabulary) = self.gather(
            query,
            (QueryKind::PlaceRecognition, QueryKind::PlaceRecognition),
            |id| (!excluded.contains(&id)).then_some(Bucket::Primary),
        );
        if gathered.primary.is_empty() {
            return PlaceCandidates::default();
        }

        let params = self.params(None, min_words);
        let ranking = search::accumulate(&mut gathered.primary, query, vocabulary.as_ref(), source, &params);

        let mut candidates = PlaceCandidates::default();
        for m in ranking.retained(self.config.retain_score_ratio) {
            let Some(other) = source.keyframe(m.keyframe) else {
                continue;
            };
            if other.map_id == kf.map_id {
                candidates.loop_candidates.push(m.keyframe);
            } else {
                candidates.merge_candidates.push(m.keyframe);
            }
        }

        tracing::debug!(
            "{} place recognition query: {} sharing, {}/{} candidates",
            kf.id,
            gathered.primary.len(),
            candidates.loop_candidates.len(),
            candidates.merge_candidates.len()
        );
        candidates
    }

    /// Up to `num_candidates` loop and merge candidates each, best first.
    ///
    /// No retention threshold: all groups are sorted by accumulated score
    /// and taken in order. Bad representatives are skipped, and merge
    /// candidates must belong to a non-bad map.
    pub fn detect_n_best_candidates<S>(&self, kf: &KeyFrame, num_candidates: usize, source: &S) -> PlaceCandidates
    where
        S: KeyFrameSource + ?Sized,
    {
        let mut candidates = PlaceCandidates::default();
        if num_candidates == 0 {
            return candidates;
        }
        let Some(query) = non_empty_bow(kf.bow_vector()) else {
            return candidates;
        };
        let excluded = exclusion_set(kf);

        let (mut gathered, vocabulary) = self.gather(
            query,
            (QueryKind::PlaceRecognition, QueryKind::PlaceRecognition),
            |id| (!excluded.contains(&id)).then_some(Bucket::Primary),
        );
        if gathered.primary.is_empty() {
            return candidates;
        }

        let params = self.params(None, 0);
        let ranking = search::accumulate(&mut gathered.primary, query, vocabulary.as_ref(), source, &params);

        let loop_cands = &mut candidates.loop_candidates;
        let merge_cands = &mut candidates.merge_candidates;
        let mut already_added = HashSet::new();
        for m in ranking.into_sorted() {
            if loop_cands.len() >= num_candidates && merge_cands.len() >= num_candidates {
                break;
            }
            let Some(other) = source.keyframe(m.keyframe) else {
                continue;
            };
            if other.is_bad || !already_added.insert(m.keyframe) {
                continue;
            }

            if other.map_id == kf.map_id {
                if loop_cands.len() < num_candidates {
                    loop_cands.push(m.keyframe);
                }
            } else if merge_cands.len() < num_candidates && !source.is_map_bad(other.map_id) {
                merge_cands.push(m.keyframe);
            }
        }

        tracing::debug!(
            "{} n-best query: {} sharing, {}/{} candidates",
            kf.id,
            gathered.primary.len(),
            candidates.loop_candidates.len(),
            candidates.merge_candidates.len()
        );
        candidates
    }

    /// Relocalization candidates for a Frame, restricted to `map_id`.
    ///
    /// Nothing is excluded at gather time: a lost Frame has no covisibility.
    pub fn detect_relocalization_candidates<S>(&self, frame: &Frame, map_id: MapId, source: &S) -> Vec<KeyFrameId>
    where
        S: KeyFrameSource + ?Sized,
    {
        let Some(query) = non_empty_bow(frame.bow_vector()) else {
            return Vec::new();
        };

        let (mut gathered, vocabulary) = self.gather(
            query,
            (QueryKind::Relocalization, QueryKind::Relocalization),
            |_| Some(Bucket::Primary),
        );
        if gathered.primary.is_empty() {
            return Vec::new();
        }

        let params = self.params(None, 0);
        let ranking = search::accumulate(&mut gathered.primary, query, vocabulary.as_ref(), source, &params);
        let candidates: Vec<KeyFrameId> = ranking
            .retained(self.config.retain_score_ratio)
            .into_iter()
            .filter(|m| source.keyframe(m.keyframe).map_or(false, |kf| kf.map_id == map_id))
            .map(|m| m.keyframe)
            .collect();

        tracing::debug!(
            "{} relocalization query in {}: {} sharing, {} candidates",
            frame.id,
            map_id,
            gathered.primary.len(),
            candidates.len()
        );
        candidates
    }

    /// Run the gather phase under the lock.
    ///
    /// Also returns the vocabulary in use, so scoring can run unlocked.
    fn gather<F>(&self, query: &BowVector, kinds: (QueryKind, QueryKind), route: F) -> (Gathered, Arc<dyn Vocabulary>)
    where
        F: FnMut(KeyFrameId) -> Option<Bucket>,
    {
        let inner = self.inner.lock();
        let gathered = search::gather(&inner.index, query, kinds, route);
        (gathered, Arc::clone(&inner.vocabulary))
    }

    fn params(&self, min_score: Option<f64>, min_common_words: usize) -> SearchParams<'_> {
        SearchParams {
            config: &self.config,
            min_score,
            min_common_words,
        }
    }
}

impl std::fmt::Debug for KeyFrameDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("KeyFrameDatabase")
            .field("num_words", &inner.index.num_words())
            .field("num_entries", &inner.index.num_entries())
            .field("config", &self.config)
            .finish()
    }
}

/// The query KeyFrame and everything connected to it.
fn exclusion_set(kf: &KeyFrame) -> HashSet<KeyFrameId> {
    let mut excluded = kf.connected_keyframes();
    excluded.insert(kf.id);
    excluded
}

fn non_empty_bow(bow: Option<&BowVector>) -> Option<&BowVector> {
    bow.filter(|b| !b.is_empty())
}

/// Non-positive minimum scores mean "no floor".
fn floor(min_score: f64) -> Option<f64> {
    (min_score > 0.0).then_some(min_score)
}
