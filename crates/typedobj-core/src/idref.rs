use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use typedobj_canonical::ValidationError;

use crate::location::LocationPath;

/// Tag naming a family of ids handled by one handler, e.g. `ws`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdReferenceType(String);

impl IdReferenceType {
    /// Creates a new instance without validation; callers are responsible for conformity.
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Parses a validated tag (pattern: `[A-Za-z0-9_.:-]+`).
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        if !Regex::new(r"^[A-Za-z0-9_.:-]+$")
            .expect("invalid regex")
            .is_match(&s)
        {
            return Err(ValidationError::PatternMismatch {
                field: "IdReferenceType",
                value: s,
            });
        }
        Ok(Self(s))
    }

    /// The tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for IdReferenceType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An id discovered during validation, with its exact position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdReference {
    id_type: IdReferenceType,
    id: String,
    location: LocationPath,
    is_field_name: bool,
    attributes: Vec<String>,
}

impl IdReference {
    /// Records a reference.
    pub fn new(
        id_type: IdReferenceType,
        id: impl Into<String>,
        location: LocationPath,
        is_field_name: bool,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            id_type,
            id: id.into(),
            location,
            is_field_name,
            attributes,
        }
    }

    /// Reference type tag.
    pub fn id_type(&self) -> &IdReferenceType {
        &self.id_type
    }

    /// Raw id text as it appears in the document.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the id was found. For field names this is the member's path.
    pub fn location(&self) -> &LocationPath {
        &self.location
    }

    /// True when the id is an object key rather than a value.
    pub fn is_field_name(&self) -> bool {
        self.is_field_name
    }

    /// Allowed target types; empty means any.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

/// Resolved form of an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RemappedId {
    /// Canonical replacement text.
    pub id: String,
    /// Concrete type of the target, when the resolver reports one.
    pub target_type: Option<String>,
}

impl RemappedId {
    /// A remapping with no target type information.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parse() {
        assert!(IdReferenceType::parse("ws").is_ok());
        assert!(IdReferenceType::parse("data.palette:v1").is_ok());
        assert!(IdReferenceType::parse("").is_err());
        assert!(IdReferenceType::parse("a b").is_err());
    }

    #[test]
    fn test_reference_serializes_location_as_path() {
        let reference = IdReference::new(
            IdReferenceType::new("ws".into()),
            "1/2/3",
            LocationPath::from_segments(vec![crate::location::PathSegment::Field("ref".into())]),
            false,
            vec!["Genome".into()],
        );
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["location"], "/ref");
        assert_eq!(value["id_type"], "ws");
    }
}
