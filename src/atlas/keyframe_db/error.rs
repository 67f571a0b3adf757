//! Errors raised by the keyframe database.
//!
//! Queries never fail: "no candidates" is an empty result. Only persistence
//! and configuration loading can go wrong.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("keyframe database I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keyframe database encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("not a keyframe database file (bad magic)")]
    BadHeader,

    #[error("unsupported keyframe database format version {0}")]
    UnsupportedVersion(u32),

    /// The persisted index was built for a vocabulary of a different size.
    #[error("inverted index has {found} word slots but the vocabulary has {expected} words")]
    VocabularyMismatch { expected: usize, found: usize },

    #[error("invalid keyframe database config: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A config value outside its valid range.
    #[error("keyframe database config: {0}")]
    InvalidConfig(String),
}
