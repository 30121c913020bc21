//! Metadata extraction from canonical documents.
//!
//! An object schema may carry a `metadata-ws` selection: a JSON object whose
//! members name metadata entries and whose values are expressions. An
//! expression is a dot separated field path from the document root,
//! optionally wrapped in `length(...)`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use typedobj_canonical::{Token, TokenSource};

use crate::errors::MetadataError;
use crate::location::LocationTracker;

/// Default cap on the total size of extracted metadata.
pub const DEFAULT_MAX_METADATA_SIZE: usize = 16_000;

/// Extracted `name -> value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtractedMetadata(BTreeMap<String, String>);

impl ExtractedMetadata {
    /// Value of one entry.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sum of name and value lengths in bytes.
    pub fn size(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// The underlying map.
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

#[derive(Debug, Default)]
struct SelectionNode {
    children: BTreeMap<String, SelectionNode>,
    values: Vec<String>,
    lengths: Vec<String>,
}

impl SelectionNode {
    fn compile(selection: &Value) -> Result<Self, MetadataError> {
        let members = selection.as_object().ok_or_else(|| {
            MetadataError::InvalidSelection("selection must be an object".to_string())
        })?;
        let mut root = SelectionNode::default();
        for (name, expression) in members {
            let expression = expression.as_str().ok_or_else(|| {
                MetadataError::InvalidSelection(format!("expression for '{name}' must be a string"))
            })?;
            let expression = expression.trim();
            let (path, length) = match expression
                .strip_prefix("length(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                Some(inner) => (inner, true),
                None => (expression, false),
            };
            if path.is_empty() {
                return Err(MetadataError::InvalidSelection(format!(
                    "expression for '{name}' is empty"
                )));
            }
            let node = path.split('.').fold(&mut root, |node, field| {
                node.children.entry(field.to_string()).or_default()
            });
            if length {
                node.lengths.push(name.clone());
            } else {
                node.values.push(name.clone());
            }
        }
        Ok(root)
    }
}

struct Extractor<'a> {
    tokens: &'a mut dyn TokenSource,
    location: LocationTracker,
    max_size: usize,
    size: usize,
    saved: BTreeMap<String, String>,
}

impl Extractor<'_> {
    fn next(&mut self) -> Result<Token, MetadataError> {
        self.tokens.next_token()?.ok_or_else(|| {
            MetadataError::InvalidSelection(format!("document ended at {}", self.location))
        })
    }

    fn save(&mut self, names: &[String], value: &str) -> Result<(), MetadataError> {
        for name in names {
            self.size += name.len() + value.len();
            if self.size > self.max_size {
                return Err(MetadataError::ExceededMaxSize { max: self.max_size });
            }
            self.saved.insert(name.clone(), value.to_string());
        }
        Ok(())
    }

    fn skip(&mut self, first: &Token) -> Result<(), MetadataError> {
        if !first.is_container_start() {
            return Ok(());
        }
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()? {
                Token::StartObject | Token::StartArray => depth += 1,
                Token::EndObject | Token::EndArray => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn walk(&mut self, node: &SelectionNode, token: Token) -> Result<(), MetadataError> {
        match token {
            Token::StartObject => {
                self.location.enter();
                let mut members: u64 = 0;
                loop {
                    let name = match self.next()? {
                        Token::EndObject => break,
                        Token::FieldName(name) => name,
                        other => {
                            return Err(MetadataError::InvalidSelection(format!(
                                "unexpected {} at {}",
                                other.kind(),
                                self.location
                            )))
                        }
                    };
                    members += 1;
                    self.location.set_field(&name);
                    let value = self.next()?;
                    match node.children.get(&name) {
                        Some(child) => self.walk(child, value)?,
                        None => self.skip(&value)?,
                    }
                }
                self.location.leave();
                self.save(&node.lengths, &members.to_string())
            }
            Token::StartArray => {
                if !node.children.is_empty() {
                    return Err(MetadataError::InvalidSelection(format!(
                        "cannot select fields of the array at {}",
                        self.location
                    )));
                }
                let mut elements: u64 = 0;
                loop {
                    let element = self.next()?;
                    if matches!(element, Token::EndArray) {
                        break;
                    }
                    elements += 1;
                    self.skip(&element)?;
                }
                self.save(&node.lengths, &elements.to_string())
            }
            scalar => {
                if !node.children.is_empty() {
                    return Err(MetadataError::InvalidSelection(format!(
                        "cannot select fields of the scalar at {}",
                        self.location
                    )));
                }
                let text = match &scalar {
                    Token::String(s) => {
                        self.save(&node.lengths, &s.chars().count().to_string())?;
                        s.clone()
                    }
                    Token::Null => {
                        self.save(&node.lengths, "NaN")?;
                        "null".to_string()
                    }
                    other => {
                        if !node.lengths.is_empty() {
                            return Err(MetadataError::InvalidSelection(format!(
                                "length() applied to a {} at {}",
                                other.kind(),
                                self.location
                            )));
                        }
                        scalar_text(other)
                    }
                };
                self.save(&node.values, &text)
            }
        }
    }
}

fn scalar_text(token: &Token) -> String {
    match token {
        Token::Int(v) => v.to_string(),
        Token::BigInt(v) => v.to_string(),
        Token::Float(v) => serde_json::Number::from_f64(*v)
            .map(|n| n.to_string())
            .unwrap_or_else(|| v.to_string()),
        Token::Bool(v) => v.to_string(),
        Token::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// Extracts the entries `selection` names from one document.
///
/// Selected fields that are absent are left out. `length()` counts members,
/// elements or characters; on `null` it yields `NaN`.
pub fn extract_metadata(
    selection: &Value,
    tokens: &mut dyn TokenSource,
    max_size: usize,
) -> Result<ExtractedMetadata, MetadataError> {
    let root = SelectionNode::compile(selection)?;
    if root.children.is_empty() {
        return Ok(ExtractedMetadata::default());
    }
    let mut extractor = Extractor {
        tokens,
        location: LocationTracker::new(),
        max_size,
        size: 0,
        saved: BTreeMap::new(),
    };
    let first = extractor.next()?;
    extractor.walk(&root, first)?;
    Ok(ExtractedMetadata(extractor.saved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use typedobj_canonical::JsonTokenReader;

    fn extract(selection: Value, doc: &str, max: usize) -> Result<ExtractedMetadata, MetadataError> {
        extract_metadata(&selection, &mut JsonTokenReader::new(doc.as_bytes()), max)
    }

    #[test]
    fn test_values_and_lengths() {
        let meta = extract(
            json!({
                "Name": "name",
                "Size": "length(features)",
                "Source": "info.source",
                "Fields": "length(info)",
                "Chars": "length(name)",
                "Gc": "info.gc",
                "Missing": "nope.deeper"
            }),
            r#"{"features":[1,[2,3],{"a":4}],"info":{"gc":0.5,"source":"RefSeq"},"name":"E. coli"}"#,
            DEFAULT_MAX_METADATA_SIZE,
        )
        .unwrap();
        assert_eq!(meta.get("Name"), Some("E. coli"));
        assert_eq!(meta.get("Size"), Some("3"));
        assert_eq!(meta.get("Source"), Some("RefSeq"));
        assert_eq!(meta.get("Fields"), Some("2"));
        assert_eq!(meta.get("Chars"), Some("7"));
        assert_eq!(meta.get("Gc"), Some("0.5"));
        assert_eq!(meta.get("Missing"), None);
        assert_eq!(meta.len(), 6);
    }

    #[test]
    fn test_null_values() {
        let meta = extract(
            json!({"v": "x", "l": "length(x)"}),
            r#"{"x":null}"#,
            DEFAULT_MAX_METADATA_SIZE,
        )
        .unwrap();
        assert_eq!(meta.get("v"), Some("null"));
        assert_eq!(meta.get("l"), Some("NaN"));
    }

    #[test]
    fn test_size_limit() {
        let err = extract(json!({"n": "name"}), r#"{"name":"abcdefghij"}"#, 10).unwrap_err();
        assert!(matches!(err, MetadataError::ExceededMaxSize { max: 10 }));
        assert!(extract(json!({"n": "name"}), r#"{"name":"abcdefghi"}"#, 10).is_ok());
    }

    #[test]
    fn test_invalid_selections() {
        assert!(matches!(
            extract(json!(["x"]), "{}", 100),
            Err(MetadataError::InvalidSelection(_))
        ));
        assert!(matches!(
            extract(json!({"n": 1}), "{}", 100),
            Err(MetadataError::InvalidSelection(_))
        ));
        assert!(matches!(
            extract(json!({"n": "length(x)"}), r#"{"x":5}"#, 100),
            Err(MetadataError::InvalidSelection(_))
        ));
        assert!(matches!(
            extract(json!({"n": "x.y"}), r#"{"x":[1]}"#, 100),
            Err(MetadataError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_empty_selection_reads_nothing() {
        let meta = extract(json!({}), "not even json", 100).unwrap();
        assert!(meta.is_empty());
    }
}
