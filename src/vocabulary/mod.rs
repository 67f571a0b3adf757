//! Visual vocabulary used to score Bag-of-Words signatures.
//!
//! The keyframe database never builds BoW vectors itself. It only needs two
//! things from a vocabulary, captured by the [`Vocabulary`] trait:
//! - the number of visual words (to size the inverted index)
//! - a similarity score between two BoW vectors
//!
//! # Key Types
//!
//! - [`BowVector`]: sparse word id -> weight signature
//! - [`OrbVocabulary`]: DBoW2 text-format vocabulary tree with L1 scoring
//! - [`FlatVocabulary`]: word count only, L1 scoring (no tree)

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Bag-of-Words vector: word_id -> TF-IDF weight.
///
/// Ordered by word id so that every traversal (and therefore every query
/// result order) is deterministic.
pub type BowVector = BTreeMap<u32, f64>;

/// Scoring vocabulary consumed by the keyframe database.
pub trait Vocabulary: Send + Sync {
    /// Number of visual words.
    fn size(&self) -> usize;

    /// Similarity between two BoW vectors, higher is more similar.
    fn score(&self, v1: &BowVector, v2: &BowVector) -> f64;
}

/// L1 similarity score between two BoW vectors.
///
/// Computes `1 - 0.5 * ||v1 - v2||_1`, which lies in [0, 1] for
/// L1-normalized vectors, 1 meaning identical.
pub fn l1_score(v1: &BowVector, v2: &BowVector) -> f64 {
    let mut diff_sum = 0.0;

    for (word_id, w1) in v1 {
        let w2 = v2.get(word_id).copied().unwrap_or(0.0);
        diff_sum += (w1 - w2).abs();
    }

    // Add v2 entries not in v1
    for (word_id, w2) in v2 {
        if !v1.contains_key(word_id) {
            diff_sum += w2.abs();
        }
    }

    1.0 - 0.5 * diff_sum
}

/// L1-normalize a BoW vector in place.
pub fn normalize_l1(bow: &mut BowVector) {
    let sum: f64 = bow.values().map(|v| v.abs()).sum();
    if sum > 0.0 {
        for v in bow.values_mut() {
            *v /= sum;
        }
    }
}

/// Vocabulary that only knows its word count.
///
/// Useful when BoW vectors are produced elsewhere (or synthetically) and only
/// the index size and a scoring function are needed.
#[derive(Debug, Clone, Copy)]
pub struct FlatVocabulary {
    num_words: usize,
}

impl FlatVocabulary {
    pub fn new(num_words: usize) -> Self {
        Self { num_words }
    }
}

impl Vocabulary for FlatVocabulary {
    fn size(&self) -> usize {
        self.num_words
    }

    fn score(&self, v1: &BowVector, v2: &BowVector) -> f64 {
        l1_score(v1, v2)
    }
}

/// A node in the vocabulary tree.
#[derive(Debug, Clone, Default)]
pub struct VocabNode {
    /// IDF weight (non-zero for leaf nodes)
    pub weight: f64,
    /// Word ID if this is a leaf node
    pub word_id: Option<u32>,
}

impl VocabNode {
    /// Check if this node is a leaf (visual word).
    pub fn is_leaf(&self) -> bool {
        self.word_id.is_some()
    }
}

/// ORB Vocabulary tree (DBoW2 format).
#[derive(Debug)]
pub struct OrbVocabulary {
    /// All nodes in the tree (nodes[0] is root)
    nodes: Vec<VocabNode>,
    /// Word ID to node ID mapping (for leaf nodes)
    words: Vec<u32>,
    /// Branching factor (typically 10)
    k: usize,
    /// Depth levels (typically 5-6)
    l: usize,
}

impl OrbVocabulary {
    /// Load vocabulary from DBoW2 text format.
    ///
    /// # File Format
    ///
    /// ```text
    /// k L scoring weighting
    /// parent_id is_leaf desc[0] desc[1] ... desc[31] weight
    /// ...
    /// ```
    ///
    /// - Line 1: k=branching factor, L=depth, scoring type, weighting type
    /// - Lines 2+: One line per node (excluding root)
    pub fn load_from_text<P: AsRef<Path>>(path: P) -> Result<Self, VocabularyError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parse a DBoW2 text vocabulary from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, VocabularyError> {
        let mut lines = reader.lines();

        let header = lines
            .next()
            .ok_or_else(|| VocabularyError::Parse("Empty vocabulary file".to_string()))??;

        let header_parts: Vec<&str> = header.split_whitespace().collect();
        if header_parts.len() < 2 {
            return Err(VocabularyError::Parse(
                "Invalid header format, expected: k L [scoring weighting]".to_string(),
            ));
        }

        let k: usize = header_parts[0]
            .parse()
            .map_err(|_| VocabularyError::Parse("Invalid k value".to_string()))?;
        let l: usize = header_parts[1]
            .parse()
            .map_err(|_| VocabularyError::Parse("Invalid L value".to_string()))?;

        let mut nodes = vec![VocabNode::default()];
        let mut words = Vec::new();

        for (line_num, line_result) in lines.enumerate() {
            let line = line_result?;
            let parts: Vec<&str> = line.split_whitespace().collect();

            // parent_id is_leaf desc[32] weight
            if parts.len() < 35 {
                continue;
            }

            let parent_id: u32 = parts[0].parse().map_err(|_| {
                VocabularyError::Parse(format!("Invalid parent_id at line {}", line_num + 2))
            })?;
            if parent_id as usize >= nodes.len() {
                return Err(VocabularyError::Parse(format!(
                    "Unknown parent {} at line {}",
                    parent_id,
                    line_num + 2
                )));
            }
            let is_leaf = parts[1] == "1";

            // Descriptors only matter when transforming features; check them
            // but do not keep them.
            for byte_str in &parts[2..34] {
                byte_str.parse::<u8>().map_err(|_| {
                    VocabularyError::Parse(format!("Invalid descriptor byte at line {}", line_num + 2))
                })?;
            }

            let weight: f64 = parts[34].parse().map_err(|_| {
                VocabularyError::Parse(format!("Invalid weight at line {}", line_num + 2))
            })?;

            let node_id = nodes.len() as u32;
            let mut node = VocabNode {
                weight,
                word_id: None,
            };
            if is_leaf {
                node.word_id = Some(words.len() as u32);
                words.push(node_id);
            }

            nodes.push(node);
        }

        tracing::info!(
            "Loaded vocabulary: k={}, L={}, {} nodes, {} words",
            k,
            l,
            nodes.len(),
            words.len()
        );

        Ok(Self { nodes, words, k, l })
    }

    /// Get vocabulary parameters.
    pub fn params(&self) -> (usize, usize) {
        (self.k, self.l)
    }

    /// Get number of visual words (leaf nodes).
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Get number of nodes in the tree.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// IDF weight of a visual word.
    pub fn word_weight(&self, word_id: u32) -> Option<f64> {
        let node_id = *self.words.get(word_id as usize)?;
        self.nodes.get(node_id as usize).map(|n| n.weight)
    }
}

impl Vocabulary for OrbVocabulary {
    fn size(&self) -> usize {
        self.num_words()
    }

    fn score(&self, v1: &BowVector, v2: &BowVector) -> f64 {
        l1_score(v1, v2)
    }
}

/// Errors that can occur when loading a vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum VocabularyError {
    /// I/O error reading vocabulary file
    #[error("Vocabulary I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error in vocabulary format
    #[error("Vocabulary parse error: {0}")]
    Parse(String),
}
