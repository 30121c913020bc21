//! Per-document validation reports.
//!
//! A [`ValidationReport`] is produced by one validation pass and keeps the
//! document's [`DocumentSource`], so its relabeled and canonical forms can be
//! computed once the batch's ids are processed, and recomputed after cached
//! resources are released.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use typedobj_canonical::{
    CanonicalDocument, Canonicalizer, Checksum, DocumentSource, JsonTokenReader, JsonTokenWriter,
    TokenBuffer, TokenError,
};

use crate::errors::{ReportError, ValidationAbort};
use crate::handlers::IdReferenceHandlerSet;
use crate::idref::{IdReference, IdReferenceType};
use crate::metadata::{extract_metadata, ExtractedMetadata};
use crate::options::EngineOptions;
use crate::relabel::relabel;
use crate::schema::SchemaNode;
use crate::validator::{validate, CollectedReport, ReportCollector, ValidationSink};

#[derive(Debug, Clone, Copy)]
struct RelabeledSummary {
    size: u64,
    naturally_sorted: bool,
}

/// Outcome of validating one document, plus its lazily computed canonical form.
pub struct ValidationReport {
    schema: Arc<SchemaNode>,
    source: Arc<dyn DocumentSource>,
    errors: Vec<String>,
    suppressed_errors: usize,
    id_references: Vec<IdReference>,
    metadata_selection: Option<Value>,
    relabeled: Option<RelabeledSummary>,
    canonical: Option<CanonicalDocument>,
}

impl ValidationReport {
    /// Wraps what a collector gathered for `source`.
    pub fn new(
        schema: Arc<SchemaNode>,
        source: Arc<dyn DocumentSource>,
        collected: CollectedReport,
    ) -> Self {
        Self {
            schema,
            source,
            errors: collected.errors,
            suppressed_errors: collected.suppressed_errors,
            id_references: collected.id_references,
            metadata_selection: collected.metadata_selection,
            relabeled: None,
            canonical: None,
        }
    }

    /// Schema the document was validated against.
    pub fn schema(&self) -> &Arc<SchemaNode> {
        &self.schema
    }

    /// Origin of the document.
    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// Recorded error messages.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Errors dropped after the cap was reached.
    pub fn suppressed_errors(&self) -> usize {
        self.suppressed_errors
    }

    /// True when no error was found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.suppressed_errors == 0
    }

    /// Ids in discovery order.
    pub fn id_references(&self) -> &[IdReference] {
        &self.id_references
    }

    /// Ids grouped by reference type.
    pub fn id_references_by_type(&self) -> BTreeMap<&IdReferenceType, Vec<&IdReference>> {
        let mut grouped: BTreeMap<&IdReferenceType, Vec<&IdReference>> = BTreeMap::new();
        for reference in &self.id_references {
            grouped.entry(reference.id_type()).or_default().push(reference);
        }
        grouped
    }

    /// The root object's `metadata-ws` selection, if any.
    pub fn metadata_selection(&self) -> Option<&Value> {
        self.metadata_selection.as_ref()
    }

    fn check_ready<T>(&self, handlers: &IdReferenceHandlerSet<T>) -> Result<(), ReportError> {
        if !self.is_valid() {
            return Err(ReportError::InvalidDocument {
                errors: self.errors.len() + self.suppressed_errors,
            });
        }
        if !handlers.is_processed() {
            return Err(ReportError::NotProcessed);
        }
        Ok(())
    }

    /// Size in bytes of the relabeled document; computed once.
    pub fn relabeled_size<T>(&mut self, handlers: &IdReferenceHandlerSet<T>) -> Result<u64, ReportError> {
        if let Some(summary) = self.relabeled {
            return Ok(summary.size);
        }
        self.check_ready(handlers)?;
        let mut tokens = self.source.open()?;
        let mut writer = JsonTokenWriter::new(io::sink());
        let outcome = relabel(&mut *tokens, &self.id_references, handlers, &mut writer)?;
        let summary = RelabeledSummary {
            size: writer.bytes_written(),
            naturally_sorted: outcome.naturally_sorted,
        };
        self.relabeled = Some(summary);
        Ok(summary.size)
    }

    /// The relabeled token stream, materialized.
    pub fn relabeled_tokens<T>(&self, handlers: &IdReferenceHandlerSet<T>) -> Result<TokenBuffer, ReportError> {
        self.check_ready(handlers)?;
        let mut tokens = self.source.open()?;
        let mut buffer = TokenBuffer::new();
        relabel(&mut *tokens, &self.id_references, handlers, &mut buffer)?;
        Ok(buffer)
    }

    /// Relabels and canonicalizes the document; the result is cached.
    pub fn canonicalize<T>(
        &mut self,
        handlers: &IdReferenceHandlerSet<T>,
        canonicalizer: &Canonicalizer,
    ) -> Result<&CanonicalDocument, ReportError> {
        if self.canonical.is_none() {
            self.check_ready(handlers)?;
            let mut tokens = self.source.open()?;
            let references = &self.id_references;
            let document = canonicalizer.canonicalize_with(|sink| {
                relabel(&mut *tokens, references, handlers, sink)?;
                Ok::<_, ReportError>(())
            })?;
            debug!(
                size = document.size(),
                checksum = %document.checksum(),
                spilled = document.is_spilled(),
                "canonicalized document"
            );
            self.relabeled = Some(RelabeledSummary {
                size: document.size(),
                naturally_sorted: document.is_naturally_sorted(),
            });
            self.canonical = Some(document);
        }
        self.canonical.as_ref().ok_or(ReportError::NotCanonicalized)
    }

    /// Cached canonical form.
    pub fn canonical(&self) -> Option<&CanonicalDocument> {
        self.canonical.as_ref()
    }

    /// Checksum of the canonical form, once computed.
    pub fn checksum(&self) -> Option<&Checksum> {
        self.canonical.as_ref().map(CanonicalDocument::checksum)
    }

    /// Size of the canonical form, once computed.
    pub fn canonical_size(&self) -> Option<u64> {
        self.canonical.as_ref().map(CanonicalDocument::size)
    }

    /// Whether the relabeled document needed no key sorting, once known.
    pub fn is_naturally_sorted(&self) -> Option<bool> {
        self.relabeled.map(|summary| summary.naturally_sorted)
    }

    /// Drops the cached canonical bytes and any temp file. Safe to repeat.
    pub fn destroy_cached_resources(&mut self) {
        if self.canonical.take().is_some() {
            debug!("released canonical document");
        }
    }

    /// Extracts metadata from the canonical form using the root selection.
    pub fn metadata(&self, max_size: usize) -> Result<ExtractedMetadata, ReportError> {
        if !self.is_valid() {
            return Err(ReportError::InvalidDocument {
                errors: self.errors.len() + self.suppressed_errors,
            });
        }
        let Some(selection) = self.metadata_selection() else {
            return Ok(ExtractedMetadata::default());
        };
        let canonical = self.canonical.as_ref().ok_or(ReportError::NotCanonicalized)?;
        let reader = canonical.reader().map_err(TokenError::from)?;
        let mut tokens = JsonTokenReader::new(reader);
        Ok(extract_metadata(selection, &mut tokens, max_size)?)
    }
}

impl std::fmt::Debug for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationReport")
            .field("source", &self.source)
            .field("errors", &self.errors)
            .field("suppressed_errors", &self.suppressed_errors)
            .field("id_references", &self.id_references.len())
            .field("canonical", &self.canonical.as_ref().map(CanonicalDocument::checksum))
            .finish()
    }
}

/// Validates single documents into [`ValidationReport`]s.
#[derive(Debug, Clone, Default)]
pub struct DocumentValidator {
    options: EngineOptions,
}

impl DocumentValidator {
    /// Creates a validator with the given limits.
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Validates `source`, keeping ids in the report only.
    pub fn validate(
        &self,
        schema: Arc<SchemaNode>,
        source: Arc<dyn DocumentSource>,
    ) -> Result<ValidationReport, ValidationAbort> {
        let mut collector = ReportCollector::new(self.options.max_errors);
        run(&schema, source.as_ref(), &mut collector)?;
        Ok(ValidationReport::new(schema, source, collector.finish()))
    }

    /// Validates `source`, also adding every id to `handlers` under `origin`.
    pub fn validate_into<T>(
        &self,
        schema: Arc<SchemaNode>,
        source: Arc<dyn DocumentSource>,
        handlers: &mut IdReferenceHandlerSet<T>,
        origin: T,
    ) -> Result<ValidationReport, ValidationAbort> {
        let mut collector = ReportCollector::forwarding(self.options.max_errors, handlers, origin);
        run(&schema, source.as_ref(), &mut collector)?;
        Ok(ValidationReport::new(schema, source, collector.finish()))
    }
}

fn run(
    schema: &SchemaNode,
    source: &dyn DocumentSource,
    sink: &mut dyn ValidationSink,
) -> Result<(), ValidationAbort> {
    let mut tokens = source.open()?;
    let result = validate(schema, &mut *tokens, sink);
    tokens.close();
    debug!(ok = result.is_ok(), "validated document");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{IdentityHandler, ResolvingHandler};
    use crate::resolver::StaticResolver;
    use serde_json::json;
    use typedobj_canonical::{CanonicalizerOptions, JsonBytes};

    fn schema() -> Arc<SchemaNode> {
        Arc::new(
            SchemaNode::from_json(&json!({
                "type": "object",
                "metadata-ws": {"count": "length(refs)", "name": "name"},
                "properties": {
                    "name": {"type": "string"},
                    "refs": {"type": "array", "items": {"type": "string", "id-reference": {"id-type": "ws"}}}
                }
            }))
            .unwrap(),
        )
    }

    fn handlers() -> IdReferenceHandlerSet<u32> {
        IdReferenceHandlerSet::builder(10)
            .with_handler(ResolvingHandler::new(
                IdReferenceType::parse("ws").unwrap(),
                StaticResolver::new()
                    .with_target("b", "2/1/1", "T")
                    .with_target("a", "1/1/1", "T"),
            ))
            .build()
    }

    #[test]
    fn test_report_lifecycle() {
        let validator = DocumentValidator::default();
        let source = Arc::new(JsonBytes::new(r#"{"refs":["b","a"],"name":"x"}"#));
        let mut handlers = handlers();
        let mut report = validator
            .validate_into(schema(), source, &mut handlers, 0)
            .unwrap();
        assert!(report.is_valid());
        assert_eq!(report.id_references().len(), 2);
        assert_eq!(report.id_references_by_type().len(), 1);
        assert!(report.checksum().is_none());

        let canonicalizer = Canonicalizer::new(CanonicalizerOptions::default());
        assert!(matches!(
            report.canonicalize(&handlers, &canonicalizer),
            Err(ReportError::NotProcessed)
        ));
        handlers.process().unwrap();
        let bytes = report.canonicalize(&handlers, &canonicalizer).unwrap().to_vec().unwrap();
        assert_eq!(bytes, br#"{"name":"x","refs":["2/1/1","1/1/1"]}"#.to_vec());
        assert_eq!(report.is_naturally_sorted(), Some(false));
        assert_eq!(report.canonical_size(), Some(bytes.len() as u64));
        assert_eq!(report.checksum(), Some(&Checksum::of(&bytes)));

        let metadata = report.metadata(1000).unwrap();
        assert_eq!(metadata.get("count"), Some("2"));
        assert_eq!(metadata.get("name"), Some("x"));

        report.destroy_cached_resources();
        report.destroy_cached_resources();
        assert!(report.canonical().is_none());
        assert!(matches!(report.metadata(1000), Err(ReportError::NotCanonicalized)));
        let again = report.canonicalize(&handlers, &canonicalizer).unwrap().to_vec().unwrap();
        assert_eq!(again, bytes);
        assert_eq!(report.relabeled_size(&handlers).unwrap(), bytes.len() as u64);
    }

    #[test]
    fn test_invalid_documents_cannot_be_canonicalized() {
        let validator = DocumentValidator::default();
        let mut report = validator
            .validate(schema(), Arc::new(JsonBytes::new(r#"{"refs":[1]}"#)))
            .unwrap();
        assert!(!report.is_valid());
        let mut handlers = IdReferenceHandlerSet::<u32>::builder(10)
            .with_handler(IdentityHandler::new(IdReferenceType::parse("ws").unwrap()))
            .build();
        handlers.process().unwrap();
        let canonicalizer = Canonicalizer::new(CanonicalizerOptions::default());
        assert!(matches!(
            report.canonicalize(&handlers, &canonicalizer),
            Err(ReportError::InvalidDocument { errors: 1 })
        ));
        assert!(matches!(report.metadata(100), Err(ReportError::InvalidDocument { .. })));
    }

    #[test]
    fn test_relabeled_tokens() {
        let validator = DocumentValidator::default();
        let mut handlers = handlers();
        let report = validator
            .validate_into(schema(), Arc::new(JsonBytes::new(r#"{"refs":["a"]}"#)), &mut handlers, 1)
            .unwrap();
        handlers.process().unwrap();
        let buffer = report.relabeled_tokens(&handlers).unwrap();
        assert_eq!(buffer, TokenBuffer::from_json(br#"{"refs":["1/1/1"]}"#).unwrap());
    }
}
