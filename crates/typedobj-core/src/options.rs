use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use typedobj_canonical::CanonicalizerOptions;

use crate::handlers::DEFAULT_MAX_UNIQUE_IDS;
use crate::metadata::DEFAULT_MAX_METADATA_SIZE;
use crate::validator::DEFAULT_MAX_ERRORS;

/// Errors raised while loading options.
#[derive(Error, Debug)]
pub enum OptionsError {
    /// The file could not be read.
    #[error("failed to read options: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a valid options document.
    #[error("invalid options: {0}")]
    Json(#[from] serde_json::Error),
}

/// Limits and canonicalization settings for validation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Error messages kept per document.
    pub max_errors: usize,
    /// Unique ids allowed across a batch.
    pub max_unique_ids: usize,
    /// Total size of extracted metadata per document.
    pub max_metadata_size: usize,
    /// Canonicalizer settings.
    pub canonical: CanonicalizerOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            max_unique_ids: DEFAULT_MAX_UNIQUE_IDS,
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
            canonical: CanonicalizerOptions::default(),
        }
    }
}

impl EngineOptions {
    /// Reads options from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sets the error cap.
    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }

    /// Sets the unique id cap.
    pub fn with_max_unique_ids(mut self, max: usize) -> Self {
        self.max_unique_ids = max;
        self
    }

    /// Sets the metadata size cap.
    pub fn with_max_metadata_size(mut self, max: usize) -> Self {
        self.max_metadata_size = max;
        self
    }

    /// Replaces the canonicalizer settings.
    pub fn with_canonical(mut self, canonical: CanonicalizerOptions) -> Self {
        self.canonical = canonical;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.max_errors, 10_000);
        assert_eq!(options.max_unique_ids, 100_000);
        assert_eq!(options.max_metadata_size, 16_000);
        assert_eq!(options.canonical.max_in_memory_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_errors": 5, "canonical": {{"max_in_memory_bytes": 1024}}}}"#).unwrap();
        let options = EngineOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.max_errors, 5);
        assert_eq!(options.max_unique_ids, 100_000);
        assert_eq!(options.canonical.max_in_memory_bytes, 1024);
    }

    #[test]
    fn test_rejects_unreadable_files() {
        assert!(matches!(
            EngineOptions::from_json_file("/nonexistent/options.json"),
            Err(OptionsError::Io(_))
        ));
    }
}
