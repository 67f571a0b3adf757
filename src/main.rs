use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;

use rust_vslam_placerec::atlas::{Atlas, KeyFrameDatabase, KeyFrameDatabaseConfig, KeyFrameId, KeyFrameSource};
use rust_vslam_placerec::tracking::{Frame, FrameId};
use rust_vslam_placerec::vocabulary::{normalize_l1, BowVector, FlatVocabulary, OrbVocabulary, Vocabulary};

/// Words shared by every view of a synthetic place.
const WORDS_PER_PLACE: usize = 60;
/// Distinct places along the synthetic trajectory.
const NUM_PLACES: usize = 12;
/// KeyFrames per place.
const VIEWS_PER_PLACE: usize = 3;
/// Fraction of a place's words each view keeps.
const VIEW_OVERLAP: f64 = 0.85;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Counters reported by the loop detection thread.
#[derive(Debug, Default)]
struct DetectionStats {
    keyframes_processed: usize,
    loop_queries_hit: usize,
    merge_queries_hit: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    // Usage: placerec-demo [config.yaml] [ORBvoc.txt]
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => KeyFrameDatabaseConfig::from_yaml_file(&path)
            .with_context(|| format!("loading keyframe database config from {}", path))?,
        None => KeyFrameDatabaseConfig::default(),
    };
    let vocabulary: Arc<dyn Vocabulary> = match args.next() {
        Some(path) => Arc::new(
            OrbVocabulary::load_from_text(&path).with_context(|| format!("loading vocabulary from {}", path))?,
        ),
        None => Arc::new(FlatVocabulary::new(4096)),
    };
    println!("Vocabulary: {} words, config: {:?}", vocabulary.size(), config);

    let places = synthetic_places(vocabulary.size())?;
    let atlas = Arc::new(RwLock::new(Atlas::with_database(KeyFrameDatabase::with_config(
        Arc::clone(&vocabulary),
        config.clone(),
    ))));

    let (kf_sender, kf_receiver) = bounded::<KeyFrameId>(16);
    let detector = {
        let atlas = Arc::clone(&atlas);
        let vocabulary = Arc::clone(&vocabulary);
        thread::spawn(move || run_loop_detection(&atlas, vocabulary.as_ref(), kf_receiver))
    };

    // First pass through every place, then tracking is lost and a second
    // map revisits the first half of the trajectory.
    let mut rng = rand::thread_rng();
    let mut timestamp_ns = 0u64;
    let mut previous: Option<KeyFrameId> = None;

    for place in &places {
        for _ in 0..VIEWS_PER_PLACE {
            timestamp_ns += 50_000_000;
            let id = insert_keyframe(&atlas, place, timestamp_ns, previous, &mut rng);
            kf_sender.send(id).context("loop detection thread stopped")?;
            previous = Some(id);
        }
    }

    let lost_view = Frame::new(FrameId(0), timestamp_ns).with_bow_vector(view_of(&places[2], &mut rng));
    {
        let atlas = atlas.read();
        let map_id = atlas.active_map_id();
        let candidates = atlas
            .keyframe_db
            .detect_relocalization_candidates(&lost_view, map_id, &*atlas);
        println!("Relocalization candidates for {}: {:?}", lost_view.id, candidates);
    }

    let second_map = atlas.write().create_new_map();
    previous = None;
    for place in places.iter().take(NUM_PLACES / 2) {
        timestamp_ns += 50_000_000;
        let id = insert_keyframe(&atlas, place, timestamp_ns, previous, &mut rng);
        kf_sender.send(id).context("loop detection thread stopped")?;
        previous = Some(id);
    }

    drop(kf_sender);
    let stats = detector
        .join()
        .map_err(|_| anyhow!("loop detection thread panicked"))?;
    println!(
        "Loop detection: {} keyframes, {} with loop candidates, {} with merge candidates",
        stats.keyframes_processed, stats.loop_queries_hit, stats.merge_queries_hit
    );

    // Persist and reload the index
    let path = std::env::temp_dir().join("placerec-demo.kfdb");
    {
        let atlas = atlas.read();
        atlas.keyframe_db.save(&path).context("saving keyframe database")?;
        let reloaded = KeyFrameDatabase::load_with_config(&path, Arc::clone(&vocabulary), config)
            .context("loading keyframe database")?;
        println!(
            "Saved {} and reloaded {} entries from {}",
            atlas.keyframe_db.num_entries(),
            reloaded.num_entries(),
            path.display()
        );
    }

    let mut atlas = atlas.write();
    atlas.discard_map(second_map);
    println!(
        "After discarding {}: {} entries in the database",
        second_map,
        atlas.keyframe_db.num_entries()
    );

    Ok(())
}

/// Random word sets, one per place, drawn without replacement.
fn synthetic_places(num_words: usize) -> Result<Vec<Vec<u32>>> {
    let needed = WORDS_PER_PLACE * NUM_PLACES;
    if num_words < needed {
        return Err(anyhow!("vocabulary too small for the demo: {} < {} words", num_words, needed));
    }
    let num_words = u32::try_from(num_words).context("vocabulary size exceeds word id range")?;

    let mut words: Vec<u32> = (0..num_words).collect();
    words.shuffle(&mut rand::thread_rng());
    Ok(words
        .chunks(WORDS_PER_PLACE)
        .take(NUM_PLACES)
        .map(<[u32]>::to_vec)
        .collect())
}

/// A noisy view of a place: a random subset of its words with random weights.
fn view_of<R: Rng>(place: &[u32], rng: &mut R) -> BowVector {
    let mut bow = BowVector::new();
    for &word in place {
        if rng.gen_bool(VIEW_OVERLAP) {
            bow.insert(word, rng.gen_range(0.5..1.5));
        }
    }
    normalize_l1(&mut bow);
    bow
}

/// Create a KeyFrame for `place` in the active map, link it to the previous
/// one and register it for place recognition.
fn insert_keyframe<R: Rng>(
    atlas: &RwLock<Atlas>,
    place: &[u32],
    timestamp_ns: u64,
    previous: Option<KeyFrameId>,
    rng: &mut R,
) -> KeyFrameId {
    let mut atlas = atlas.write();
    let id = atlas.create_keyframe(timestamp_ns, view_of(place, rng));
    if let Some(prev) = previous {
        atlas.connect_keyframes(id, prev, rng.gen_range(15..60));
    }
    atlas.register_in_database(id);
    id
}

/// Loop detection thread: query every new KeyFrame against the database.
fn run_loop_detection(
    atlas: &RwLock<Atlas>,
    vocabulary: &dyn Vocabulary,
    kf_receiver: Receiver<KeyFrameId>,
) -> DetectionStats {
    tracing::info!("Loop detection thread started");
    let mut stats = DetectionStats::default();

    loop {
        let kf_id = match kf_receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(kf_id) => kf_id,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        stats.keyframes_processed += 1;

        let atlas = atlas.read();
        let Some(kf) = atlas.keyframe(kf_id) else {
            continue;
        };
        let Some(bow) = kf.bow_vector() else {
            continue;
        };

        // Candidates must score at least as well as the least similar
        // covisible neighbor.
        let min_score = kf
            .connected_keyframes()
            .into_iter()
            .filter_map(|id| atlas.keyframe(id)?.bow_vector().map(|other| vocabulary.score(bow, other)))
            .fold(f64::INFINITY, f64::min);
        let min_score = if min_score.is_finite() { min_score } else { 0.0 };

        let candidates = atlas.keyframe_db.detect_candidates(kf, min_score, &*atlas);
        let best = atlas.keyframe_db.detect_n_best_candidates(kf, 3, &*atlas);
        if !candidates.loop_candidates.is_empty() {
            stats.loop_queries_hit += 1;
        }
        if !candidates.merge_candidates.is_empty() {
            stats.merge_queries_hit += 1;
            tracing::info!(
                "{}: merge candidates {:?} (n-best {:?})",
                kf_id,
                candidates.merge_candidates,
                best.merge_candidates
            );
        }
    }

    tracing::info!("Loop detection thread exiting");
    stats
}
