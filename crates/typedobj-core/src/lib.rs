//! Streaming validation engine for typed objects.
//!
//! Documents are validated against compiled schemas without being
//! materialized. Validation collects errors and embedded ids with their exact
//! locations; ids from a whole batch are resolved in one round per type, then
//! each document is relabeled with the resolved ids and canonicalized.
//!
#![deny(missing_docs)]

/// Batch orchestration with single-round id resolution.
pub mod batch;
/// Error types for every engine stage.
pub mod errors;
/// Per-type id handlers and the batch-wide handler set.
pub mod handlers;
/// Id reference records.
pub mod idref;
/// Document paths and the live location tracker.
pub mod location;
/// Metadata extraction driven by `metadata-ws` selections.
pub mod metadata;
/// Exact numeric comparison across integers and floats.
pub mod numeric;
/// Engine limits and settings.
pub mod options;
/// Substitution of resolved ids into documents.
pub mod relabel;
/// Per-document reports and single-document validation.
pub mod report;
/// Collaborator interface for resolving ids.
pub mod resolver;
/// Compiled schema trees.
pub mod schema;
/// The streaming validator and its sinks.
pub mod validator;

pub use batch::{BatchDocument, BatchValidator, IdOrigin, ValidatedBatch};
pub use errors::{
    BatchError, IdReferenceError, IdReferenceErrorKind, IdReferenceHandlerError, MetadataError,
    RelabelError, ReportError, SchemaError, ValidationAbort,
};
pub use handlers::{
    IdReferenceHandler, IdReferenceHandlerSet, IdReferenceHandlerSetBuilder, IdentityHandler,
    ResolvingHandler, DEFAULT_MAX_UNIQUE_IDS,
};
pub use idref::{IdReference, IdReferenceType, RemappedId};
pub use location::{LocationPath, LocationTracker, PathSegment, Scope, Tracked};
pub use metadata::{extract_metadata, ExtractedMetadata, DEFAULT_MAX_METADATA_SIZE};
pub use numeric::NumericValue;
pub use options::{EngineOptions, OptionsError};
pub use relabel::{relabel, RelabelOutcome, RelabelPlan};
pub use report::{DocumentValidator, ValidationReport};
pub use resolver::{
    IdResolver, ResolutionFailure, ResolutionRequest, ResolvedTarget, Resolutions, ResolverError,
    StaticResolver,
};
pub use schema::{
    AdditionalProperties, ArrayItems, ArraySchema, Constraints, IdReferenceSpec, NumericBound,
    ObjectSchema, RangeSchema, SchemaKind, SchemaNode,
};
pub use validator::{
    validate, CollectedReport, ReportCollector, ValidationSink, DEFAULT_MAX_ERRORS,
};
