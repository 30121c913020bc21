use std::fmt;

use thiserror::Error;
use typedobj_canonical::{CanonicalizationError, TokenError, TokenKind};

use crate::idref::IdReferenceType;
use crate::location::LocationPath;

/// Errors raised while compiling a schema document.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A schema position is not a JSON object.
    #[error("schema at {path} is not an object")]
    NotAnObject {
        /// Position inside the schema document.
        path: String,
    },
    /// A schema position has no `type`.
    #[error("schema at {path} has no 'type'")]
    MissingType {
        /// Position inside the schema document.
        path: String,
    },
    /// A schema position has a `type` outside the supported set.
    #[error("schema at {path} has unsupported type '{found}'")]
    UnsupportedType {
        /// Position inside the schema document.
        path: String,
        /// The offending type name.
        found: String,
    },
    /// A keyword carries a malformed value.
    #[error("schema at {path}: invalid '{keyword}': {reason}")]
    InvalidKeyword {
        /// Position inside the schema document.
        path: String,
        /// Keyword name.
        keyword: &'static str,
        /// Reason for rejection.
        reason: String,
    },
    /// The schema text is not JSON.
    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single id could not be accepted or resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdReferenceErrorKind {
    /// The id text is syntactically invalid.
    Unparseable(String),
    /// The naming authority does not know the id.
    NotFound,
    /// The caller may not reference the target.
    NotAuthorized(String),
    /// The target's type is not among the allowed types.
    TypeNotAllowed {
        /// Concrete type of the target.
        actual: String,
        /// Types allowed at the reference site.
        allowed: Vec<String>,
    },
}

impl fmt::Display for IdReferenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdReferenceErrorKind::Unparseable(reason) => write!(f, "Unparseable id: {reason}"),
            IdReferenceErrorKind::NotFound => f.write_str("No such object"),
            IdReferenceErrorKind::NotAuthorized(reason) => write!(f, "Not authorized: {reason}"),
            IdReferenceErrorKind::TypeNotAllowed { actual, allowed } => write!(
                f,
                "The type {actual} of the referenced object is not in the allowed types [{}]",
                allowed.join(", ")
            ),
        }
    }
}

/// A per-id failure attributable to the object that introduced the id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (id type {id_type}, id '{id}', in {origin})")]
pub struct IdReferenceError {
    /// What went wrong.
    pub kind: IdReferenceErrorKind,
    /// Reference type.
    pub id_type: IdReferenceType,
    /// Raw id text.
    pub id: String,
    /// Allowed target types recorded for the id.
    pub attributes: Vec<String>,
    /// Display form of the associated object.
    pub origin: String,
}

/// Errors raised by id handlers and the handler set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdReferenceHandlerError {
    /// The batch-wide unique id cap was exceeded.
    #[error("Maximum ID count of {max} exceeded")]
    TooManyIds {
        /// Configured cap.
        max: usize,
    },
    /// No handler is registered for the type.
    #[error("There is no handler registered for the ID type {0}")]
    NoHandler(IdReferenceType),
    /// Ids were added after processing.
    #[error("The ID handler for type {0} has already processed its ids; no more ids can be added")]
    Locked(IdReferenceType),
    /// Remapped ids were requested before processing.
    #[error("The ID handler for type {0} has not processed its ids yet")]
    NotProcessed(IdReferenceType),
    /// A remapping was requested for an id never added.
    #[error("There is no ID {id} of type {id_type} in the handler")]
    NoSuchId {
        /// Reference type.
        id_type: IdReferenceType,
        /// Requested id.
        id: String,
    },
    /// A single id was rejected.
    #[error(transparent)]
    Reference(#[from] IdReferenceError),
    /// The naming authority failed as a whole.
    #[error("resolving ids of type {id_type} failed: {message}")]
    Resolver {
        /// Reference type.
        id_type: IdReferenceType,
        /// Failure description.
        message: String,
    },
}

/// Fatal validation failures. Structural problems are reported through the sink instead.
#[derive(Error, Debug)]
pub enum ValidationAbort {
    /// The document bytes are not well-formed.
    #[error("malformed document: {0}")]
    Token(#[from] TokenError),
    /// The token stream ended inside a value.
    #[error("document ended unexpectedly at {location}")]
    Truncated {
        /// Path where more input was expected.
        location: String,
    },
    /// The token stream itself is inconsistent.
    #[error("unexpected {found} at {location}")]
    UnexpectedToken {
        /// Token that arrived.
        found: TokenKind,
        /// Path where it arrived.
        location: String,
    },
    /// More tokens followed the root value.
    #[error("document has trailing content after the root value")]
    TrailingContent,
    /// An id could not be recorded (cap, syntax, missing handler).
    #[error(transparent)]
    IdReference(#[from] IdReferenceHandlerError),
}

impl ValidationAbort {
    /// True when the document itself is malformed.
    pub fn is_parse_error(&self) -> bool {
        match self {
            ValidationAbort::Token(e) => e.is_parse_error(),
            ValidationAbort::IdReference(_) => false,
            _ => true,
        }
    }
}

/// Errors raised while rewriting ids.
#[derive(Error, Debug)]
pub enum RelabelError {
    /// Two keys of one mapping ended up identical.
    #[error("Relabeling would produce the duplicate key '{key}' in the mapping at {location}")]
    KeyCollision {
        /// The colliding key after relabeling.
        key: String,
        /// Mapping that holds the keys.
        location: LocationPath,
    },
    /// A recorded id location does not hold an id-bearing token.
    #[error("expected an id at {location} but found {found}")]
    LocationMismatch {
        /// Recorded location.
        location: LocationPath,
        /// Token found there.
        found: TokenKind,
    },
    /// The document ended inside a value.
    #[error("document ended unexpectedly during relabeling")]
    Truncated,
    /// Token stream failure.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Remapped id lookup failed.
    #[error(transparent)]
    Handler(#[from] IdReferenceHandlerError),
}

/// Errors raised by report operations after validation.
#[derive(Error, Debug)]
pub enum ReportError {
    /// The document has validation errors.
    #[error("document is not valid ({errors} errors)")]
    InvalidDocument {
        /// Number of recorded errors.
        errors: usize,
    },
    /// The handler set has not run `process()` yet.
    #[error("id references must be processed before relabeling")]
    NotProcessed,
    /// Canonical bytes are required but not cached.
    #[error("document has not been canonicalized")]
    NotCanonicalized,
    /// Relabeling failed.
    #[error(transparent)]
    Relabel(#[from] RelabelError),
    /// Canonicalization failed.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),
    /// Reopening the document failed.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Metadata extraction failed.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl ReportError {
    /// True for environment failures (I/O, temp files) that should abort a batch.
    pub fn is_resource_error(&self) -> bool {
        match self {
            ReportError::Canonicalization(e) => e.is_resource_error(),
            ReportError::Token(TokenError::Io(_))
            | ReportError::Relabel(RelabelError::Token(TokenError::Io(_)))
            | ReportError::Metadata(MetadataError::Token(TokenError::Io(_))) => true,
            _ => false,
        }
    }
}

/// Errors raised by batch orchestration.
#[derive(Error, Debug)]
pub enum BatchError {
    /// A document could not be validated at all.
    #[error("document {document}: {source}")]
    Document {
        /// Zero-based document ordinal.
        document: usize,
        /// Underlying failure.
        source: ValidationAbort,
    },
    /// A document failed validation.
    #[error("document {document} is invalid: {errors:?}")]
    InvalidDocument {
        /// Zero-based document ordinal.
        document: usize,
        /// Recorded validation errors.
        errors: Vec<String>,
    },
    /// An id failed to resolve.
    #[error("{}: {source}", describe_origin(.document, .provenance, .location))]
    Reference {
        /// Ordinal of the document that introduced the id, when known.
        document: Option<usize>,
        /// True when the id came from provenance rather than data.
        provenance: bool,
        /// First location of the id in that document, when known.
        location: Option<LocationPath>,
        /// Underlying failure.
        source: IdReferenceError,
    },
    /// A handler set failure not tied to one id.
    #[error(transparent)]
    Handler(#[from] IdReferenceHandlerError),
    /// A document could not be relabeled or canonicalized.
    #[error("document {document} could not be canonicalized: {source}")]
    Canonicalization {
        /// Zero-based document ordinal.
        document: usize,
        /// Underlying failure.
        source: ReportError,
    },
    /// An environment failure while canonicalizing; aborts the batch.
    #[error("canonicalization of document {document} failed: {source}")]
    Resource {
        /// Zero-based document ordinal.
        document: usize,
        /// Underlying failure.
        source: ReportError,
    },
}

fn describe_origin(
    document: &Option<usize>,
    provenance: &bool,
    location: &Option<LocationPath>,
) -> String {
    match (document, provenance, location) {
        (Some(d), true, _) => format!("provenance of document {d}"),
        (Some(d), false, Some(l)) => format!("document {d} at {l}"),
        (Some(d), false, None) => format!("document {d}"),
        (None, _, _) => "unknown document".to_string(),
    }
}

/// Errors raised by metadata extraction.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Extracted metadata is larger than allowed.
    #[error("Metadata size exceeds the limit of {max} bytes")]
    ExceededMaxSize {
        /// Configured limit.
        max: usize,
    },
    /// The selection object is malformed.
    #[error("invalid metadata selection: {0}")]
    InvalidSelection(String),
    /// Token stream failure.
    #[error(transparent)]
    Token(#[from] TokenError),
}
