//! Binary save/load of the inverted index.
//!
//! Layout: `b"KFDB"`, format version as little-endian `u32`, then the
//! bincode encoding of the [`InvertedIndex`]. Only the index is stored; the
//! vocabulary is supplied again at load time and must have as many words as
//! the index has slots.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::vocabulary::Vocabulary;

use super::config::KeyFrameDatabaseConfig;
use super::database::KeyFrameDatabase;
use super::error::DatabaseError;
use super::inverted_index::InvertedIndex;

const MAGIC: &[u8; 4] = b"KFDB";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

impl KeyFrameDatabase {
    /// Serialize the inverted index.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DatabaseError> {
        let index = self.snapshot_index();
        let payload = bincode::serialize(&index)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Rebuild a database from [`KeyFrameDatabase::to_bytes`] output, with
    /// the default config.
    pub fn from_bytes(bytes: &[u8], vocabulary: Arc<dyn Vocabulary>) -> Result<Self, DatabaseError> {
        Self::from_bytes_with_config(bytes, vocabulary, KeyFrameDatabaseConfig::default())
    }

    /// Like [`KeyFrameDatabase::from_bytes`], querying with `config`.
    pub fn from_bytes_with_config(
        bytes: &[u8],
        vocabulary: Arc<dyn Vocabulary>,
        config: KeyFrameDatabaseConfig,
    ) -> Result<Self, DatabaseError> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(DatabaseError::BadHeader);
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(DatabaseError::UnsupportedVersion(version));
        }

        let index: InvertedIndex = bincode::deserialize(&bytes[HEADER_LEN..])?;
        if index.num_words() != vocabulary.size() {
            return Err(DatabaseError::VocabularyMismatch {
                expected: vocabulary.size(),
                found: index.num_words(),
            });
        }

        tracing::info!(
            "Loaded keyframe database: {} words, {} entries",
            index.num_words(),
            index.num_entries()
        );
        Ok(Self::from_parts(index, vocabulary, config))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DatabaseError> {
        let bytes = self.to_bytes()?;
        fs::write(path.as_ref(), bytes)?;
        tracing::debug!("Saved keyframe database to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, vocabulary: Arc<dyn Vocabulary>) -> Result<Self, DatabaseError> {
        Self::load_with_config(path, vocabulary, KeyFrameDatabaseConfig::default())
    }

    pub fn load_with_config<P: AsRef<Path>>(
        path: P,
        vocabulary: Arc<dyn Vocabulary>,
        config: KeyFrameDatabaseConfig,
    ) -> Result<Self, DatabaseError> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes_with_config(&bytes, vocabulary, config)
    }
}
