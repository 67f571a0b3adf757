//! Tunable constants of the candidate search.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::DatabaseError;

/// Configuration for the keyframe database queries.
///
/// Every field has a default matching the ORB-SLAM3 constants, so a YAML
/// file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFrameDatabaseConfig {
    /// Number of best covisible neighbors whose scores are accumulated.
    pub covisibility_neighbors: usize,

    /// Candidates must share more than `ratio * max_common_words` words.
    pub min_common_words_ratio: f64,

    /// Accumulated scores must exceed `ratio * best_accumulated_score`.
    pub retain_score_ratio: f64,
}

impl Default for KeyFrameDatabaseConfig {
    fn default() -> Self {
        Self {
            covisibility_neighbors: 10,
            min_common_words_ratio: 0.8,
            retain_score_ratio: 0.75,
        }
    }
}

impl KeyFrameDatabaseConfig {
    /// Parse a config from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DatabaseError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Both ratios must lie in `[0, 1]`.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        let ratios = [
            ("min_common_words_ratio", self.min_common_words_ratio),
            ("retain_score_ratio", self.retain_score_ratio),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(DatabaseError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = KeyFrameDatabaseConfig::default();
        assert_eq!(config.covisibility_neighbors, 10);
        assert_eq!(config.min_common_words_ratio, 0.8);
        assert_eq!(config.retain_score_ratio, 0.75);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = KeyFrameDatabaseConfig::from_yaml_str("covisibility_neighbors: 5\n").unwrap();
        assert_eq!(config.covisibility_neighbors, 5);
        assert_eq!(config.retain_score_ratio, 0.75);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = KeyFrameDatabaseConfig::from_yaml_str("covisibility_neighbors: many\n").unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[test]
    fn test_out_of_range_ratios_are_rejected() {
        for yaml in [
            "min_common_words_ratio: 1.5\n",
            "min_common_words_ratio: -0.1\n",
            "retain_score_ratio: .nan\n",
            "retain_score_ratio: 2\n",
        ] {
            let err = KeyFrameDatabaseConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, DatabaseError::InvalidConfig(_)), "{}", yaml);
        }

        let edges = KeyFrameDatabaseConfig::from_yaml_str("min_common_words_ratio: 0\nretain_score_ratio: 1\n");
        assert!(edges.is_ok());
        assert!(KeyFrameDatabaseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_common_words_ratio: 0.5").unwrap();
        writeln!(file, "retain_score_ratio: 0.9").unwrap();

        let config = KeyFrameDatabaseConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.min_common_words_ratio, 0.5);
        assert_eq!(config.retain_score_ratio, 0.9);
        assert_eq!(config.covisibility_neighbors, 10);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "retain_score_ratio: 1.2").unwrap();
        assert!(matches!(
            KeyFrameDatabaseConfig::from_yaml_file(bad.path()),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }
}
