//! Multi-document validation with a single id resolution round.
//!
//! Every document is validated first and its ids are added to one handler
//! set, associated with an [`IdOrigin`]. Only then is the set processed, once,
//! so each reference type costs one resolver call for the whole batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use typedobj_canonical::{Canonicalizer, Checksum, DocumentSource};

use crate::errors::{BatchError, IdReferenceError, IdReferenceHandlerError, ValidationAbort};
use crate::handlers::IdReferenceHandlerSet;
use crate::idref::IdReferenceType;
use crate::location::LocationPath;
use crate::options::EngineOptions;
use crate::report::{DocumentValidator, ValidationReport};
use crate::schema::SchemaNode;

/// Where an id entered a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdOrigin {
    /// Zero-based document ordinal.
    pub document: usize,
    /// True for ids from the document's provenance rather than its data.
    pub provenance: bool,
}

impl IdOrigin {
    /// Ids found in the data of `document`.
    pub fn data(document: usize) -> Self {
        Self {
            document,
            provenance: false,
        }
    }

    /// Ids listed in the provenance of `document`.
    pub fn provenance(document: usize) -> Self {
        Self {
            document,
            provenance: true,
        }
    }
}

impl fmt::Display for IdOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.provenance {
            write!(f, "provenance of document {}", self.document)
        } else {
            write!(f, "document {}", self.document)
        }
    }
}

/// One document of a batch.
#[derive(Debug, Clone)]
pub struct BatchDocument {
    /// Schema to validate against.
    pub schema: Arc<SchemaNode>,
    /// The document.
    pub source: Arc<dyn DocumentSource>,
    /// Ids referenced by the document's provenance.
    pub provenance_ids: Vec<(IdReferenceType, String)>,
}

impl BatchDocument {
    /// A document without provenance.
    pub fn new(schema: Arc<SchemaNode>, source: Arc<dyn DocumentSource>) -> Self {
        Self {
            schema,
            source,
            provenance_ids: Vec::new(),
        }
    }

    /// Adds a provenance id.
    pub fn with_provenance_id(mut self, id_type: IdReferenceType, id: impl Into<String>) -> Self {
        self.provenance_ids.push((id_type, id.into()));
        self
    }
}

/// Validates batches of documents.
#[derive(Debug, Clone, Default)]
pub struct BatchValidator {
    options: EngineOptions,
}

impl BatchValidator {
    /// Creates a batch validator with the given limits.
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Validates every document, then resolves all ids once.
    ///
    /// Fails on the first document that cannot be read or is invalid, and on
    /// the first id that cannot be resolved.
    pub fn validate(
        &self,
        documents: &[BatchDocument],
        mut handlers: IdReferenceHandlerSet<IdOrigin>,
    ) -> Result<ValidatedBatch, BatchError> {
        let reports = self.validate_documents(documents, &mut handlers)?;
        ValidatedBatch::resolve(reports, handlers)
    }

    #[cfg(not(feature = "parallel"))]
    fn validate_documents(
        &self,
        documents: &[BatchDocument],
        handlers: &mut IdReferenceHandlerSet<IdOrigin>,
    ) -> Result<Vec<ValidationReport>, BatchError> {
        let validator = DocumentValidator::new(self.options.clone());
        let mut reports = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            let report = validator
                .validate_into(
                    Arc::clone(&document.schema),
                    Arc::clone(&document.source),
                    handlers,
                    IdOrigin::data(index),
                )
                .map_err(|e| abort_error(index, e))?;
            add_provenance(index, document, handlers)?;
            reports.push(report);
        }
        Ok(reports)
    }

    #[cfg(feature = "parallel")]
    fn validate_documents(
        &self,
        documents: &[BatchDocument],
        handlers: &mut IdReferenceHandlerSet<IdOrigin>,
    ) -> Result<Vec<ValidationReport>, BatchError> {
        use rayon::prelude::*;

        let validator = DocumentValidator::new(self.options.clone());
        let results: Vec<Result<ValidationReport, ValidationAbort>> = documents
            .par_iter()
            .map(|document| {
                validator.validate(Arc::clone(&document.schema), Arc::clone(&document.source))
            })
            .collect();

        // Ids are merged in document order so the cap trips at the same place
        // as in a sequential run.
        let mut reports = Vec::with_capacity(results.len());
        for (index, (result, document)) in results.into_iter().zip(documents).enumerate() {
            let report = result.map_err(|e| abort_error(index, e))?;
            let origin = IdOrigin::data(index);
            for reference in report.id_references() {
                handlers.add(&origin, reference).map_err(|e| match e {
                    IdReferenceHandlerError::Reference(source) => BatchError::Reference {
                        document: Some(index),
                        provenance: false,
                        location: Some(reference.location().clone()),
                        source,
                    },
                    other => BatchError::Handler(other),
                })?;
            }
            add_provenance(index, document, handlers)?;
            reports.push(report);
        }
        Ok(reports)
    }
}

fn abort_error(document: usize, error: ValidationAbort) -> BatchError {
    match error {
        ValidationAbort::IdReference(IdReferenceHandlerError::Reference(source)) => {
            BatchError::Reference {
                document: Some(document),
                provenance: false,
                location: None,
                source,
            }
        }
        ValidationAbort::IdReference(other) => BatchError::Handler(other),
        other => BatchError::Document {
            document,
            source: other,
        },
    }
}

fn add_provenance(
    index: usize,
    document: &BatchDocument,
    handlers: &mut IdReferenceHandlerSet<IdOrigin>,
) -> Result<(), BatchError> {
    let origin = IdOrigin::provenance(index);
    for (id_type, id) in &document.provenance_ids {
        handlers
            .add_id(&origin, id_type, id, &[])
            .map_err(|e| match e {
                IdReferenceHandlerError::Reference(source) => BatchError::Reference {
                    document: Some(index),
                    provenance: true,
                    location: None,
                    source,
                },
                other => BatchError::Handler(other),
            })?;
    }
    Ok(())
}

/// Maps a resolution failure back to the document and location that introduced the id.
fn attribute(reports: &[ValidationReport], source: IdReferenceError) -> BatchError {
    let origins: HashMap<String, IdOrigin> = (0..reports.len())
        .flat_map(|i| [IdOrigin::data(i), IdOrigin::provenance(i)])
        .map(|origin| (origin.to_string(), origin))
        .collect();
    let Some(origin) = origins.get(&source.origin).copied() else {
        return BatchError::Reference {
            document: None,
            provenance: false,
            location: None,
            source,
        };
    };
    let location: Option<LocationPath> = if origin.provenance {
        None
    } else {
        reports[origin.document]
            .id_references()
            .iter()
            .find(|r| r.id_type() == &source.id_type && r.id() == source.id)
            .map(|r| r.location().clone())
    };
    BatchError::Reference {
        document: Some(origin.document),
        provenance: origin.provenance,
        location,
        source,
    }
}

/// A validated batch whose ids have been resolved.
#[derive(Debug)]
pub struct ValidatedBatch {
    reports: Vec<ValidationReport>,
    handlers: IdReferenceHandlerSet<IdOrigin>,
}

impl ValidatedBatch {
    /// Resolves the ids of already validated documents in one round.
    ///
    /// `reports[i]` must have added its ids to `handlers` under
    /// [`IdOrigin::data`]`(i)`, as [`DocumentValidator::validate_into`] does.
    /// Fails on the first invalid report and on the first id that cannot be
    /// resolved.
    pub fn resolve(
        reports: Vec<ValidationReport>,
        mut handlers: IdReferenceHandlerSet<IdOrigin>,
    ) -> Result<Self, BatchError> {
        if let Some((document, report)) = reports
            .iter()
            .enumerate()
            .find(|(_, report)| !report.is_valid())
        {
            warn!(document, errors = report.errors().len(), "invalid document in batch");
            return Err(BatchError::InvalidDocument {
                document,
                errors: report.errors().to_vec(),
            });
        }

        if let Err(e) = handlers.process() {
            return Err(match e {
                IdReferenceHandlerError::Reference(source) => attribute(&reports, source),
                other => BatchError::Handler(other),
            });
        }
        info!(
            documents = reports.len(),
            unique_ids = handlers.unique_id_count(),
            "validated batch"
        );
        Ok(Self { reports, handlers })
    }

    /// Reports in document order.
    pub fn reports(&self) -> &[ValidationReport] {
        &self.reports
    }

    /// Report of one document.
    pub fn report(&self, document: usize) -> Option<&ValidationReport> {
        self.reports.get(document)
    }

    /// The processed handler set.
    pub fn handlers(&self) -> &IdReferenceHandlerSet<IdOrigin> {
        &self.handlers
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// True for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Canonicalizes every document.
    ///
    /// A document that fails (for instance on a key collision) gets an error
    /// entry and the others proceed. Resource failures abort the whole batch
    /// and release every cached canonical form.
    pub fn canonicalize_all(
        &mut self,
        canonicalizer: &Canonicalizer,
    ) -> Result<Vec<Result<Checksum, BatchError>>, BatchError> {
        let Self { reports, handlers } = self;
        let mut results = Vec::with_capacity(reports.len());
        let mut fatal = None;
        for (document, report) in reports.iter_mut().enumerate() {
            match report.canonicalize(handlers, canonicalizer) {
                Ok(canonical) => results.push(Ok(canonical.checksum().clone())),
                Err(source) if source.is_resource_error() => {
                    fatal = Some(BatchError::Resource { document, source });
                    break;
                }
                Err(source) => {
                    warn!(document, error = %source, "document could not be canonicalized");
                    results.push(Err(BatchError::Canonicalization { document, source }));
                }
            }
        }
        if let Some(error) = fatal {
            for report in reports.iter_mut() {
                report.destroy_cached_resources();
            }
            return Err(error);
        }
        Ok(results)
    }

    /// Splits the batch into its reports and handler set.
    pub fn into_parts(self) -> (Vec<ValidationReport>, IdReferenceHandlerSet<IdOrigin>) {
        (self.reports, self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_display_and_order() {
        assert_eq!(IdOrigin::data(2).to_string(), "document 2");
        assert_eq!(
            IdOrigin::provenance(2).to_string(),
            "provenance of document 2"
        );
        assert!(IdOrigin::data(1) < IdOrigin::provenance(1));
        assert!(IdOrigin::provenance(1) < IdOrigin::data(2));
    }
}
