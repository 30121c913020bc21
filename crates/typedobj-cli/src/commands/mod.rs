//! Subcommand implementations and the input helpers they share.

pub mod canonicalize;
pub mod checksum;
pub mod validate;

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;

use thiserror::Error;
use typedobj_canonical::{
    CanonicalDocument, Canonicalizer, CanonicalizerOptions, DocumentSource, JsonBytes, JsonFile,
};
use typedobj_core::ResolvedTarget;

/// Failures reading command inputs.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid id map {path}: {source}")]
    IdMap {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid --ids argument '{0}', expected TYPE=MAP.json")]
    IdsArgument(String),
}

/// Opens a file input, or buffers stdin when no path is given.
pub fn open_input(input: Option<String>) -> Result<Box<dyn DocumentSource>, InputError> {
    match input {
        Some(path) => {
            let path = PathBuf::from(path);
            if let Err(source) = std::fs::metadata(&path) {
                return Err(InputError::Read { path, source });
            }
            Ok(Box::new(JsonFile::new(path)))
        }
        None => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .map_err(|source| InputError::Read {
                    path: PathBuf::from("<stdin>"),
                    source,
                })?;
            Ok(Box::new(JsonBytes::new(buffer)))
        }
    }
}

/// Canonicalizes a whole input without validation.
pub fn canonicalize_input(
    input: Option<String>,
    max_memory: Option<u64>,
) -> Result<CanonicalDocument, Box<dyn std::error::Error>> {
    let mut options = CanonicalizerOptions::default();
    if let Some(bytes) = max_memory {
        options = options.with_max_in_memory_bytes(bytes);
    }
    let canonicalizer = Canonicalizer::new(options);

    let source = open_input(input)?;
    let mut tokens = source.open()?;
    let result = canonicalizer.canonicalize(&mut *tokens);
    tokens.close();
    Ok(result.map_err(|e| format!("Canonicalization failed: {}", e))?)
}

/// Loads a `raw id -> {"id", "type"}` map.
pub fn load_id_map(path: &str) -> Result<BTreeMap<String, ResolvedTarget>, InputError> {
    let path = PathBuf::from(path);
    let text = std::fs::read_to_string(&path).map_err(|source| InputError::Read {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| InputError::IdMap { path, source })
}

/// Splits a `TYPE=MAP.json` argument.
pub fn split_ids_argument(arg: &str) -> Result<(&str, &str), InputError> {
    match arg.split_once('=') {
        Some((id_type, path)) if !id_type.is_empty() && !path.is_empty() => Ok((id_type, path)),
        _ => Err(InputError::IdsArgument(arg.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ids_argument() {
        assert_eq!(split_ids_argument("ws=map.json").unwrap(), ("ws", "map.json"));
        assert_eq!(split_ids_argument("ws=a=b.json").unwrap(), ("ws", "a=b.json"));
        assert!(split_ids_argument("ws").is_err());
        assert!(split_ids_argument("=map.json").is_err());
        assert!(split_ids_argument("ws=").is_err());
    }

    #[test]
    fn test_load_id_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        std::fs::write(&path, r#"{"genome": {"id": "1/1/1", "type": "Genome"}}"#).unwrap();
        let map = load_id_map(path.to_str().unwrap()).unwrap();
        assert_eq!(map["genome"], ResolvedTarget::new("1/1/1", "Genome"));

        std::fs::write(&path, r#"{"genome": "1/1/1"}"#).unwrap();
        let err = load_id_map(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, InputError::IdMap { .. }));
    }
}
