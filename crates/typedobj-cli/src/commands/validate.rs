//! Validate command implementation.

use std::sync::Arc;

use tracing::info;
use typedobj_canonical::{Canonicalizer, DocumentSource, JsonFile};
use typedobj_core::{
    DocumentValidator, EngineOptions, IdOrigin, IdReferenceHandlerSet, IdReferenceType,
    IdentityHandler, ResolvingHandler, SchemaNode, StaticResolver, ValidatedBatch,
    ValidationAbort,
};

use super::{load_id_map, split_ids_argument, InputError};
use crate::output::{self, DocumentOutcome, IdLine};

pub struct Args {
    pub schema: String,
    pub ids: Vec<String>,
    pub identity: Vec<String>,
    pub documents: Vec<String>,
    pub json: bool,
    pub max_memory: Option<u64>,
    pub config: Option<String>,
}

pub fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = match &args.config {
        Some(path) => EngineOptions::from_json_file(path)
            .map_err(|e| format!("Failed to load config {}: {}", path, e))?,
        None => EngineOptions::default(),
    };
    if let Some(bytes) = args.max_memory {
        options.canonical = options.canonical.with_max_in_memory_bytes(bytes);
    }

    let schema_text = std::fs::read_to_string(&args.schema).map_err(|source| InputError::Read {
        path: args.schema.clone().into(),
        source,
    })?;
    let schema = Arc::new(
        SchemaNode::parse(&schema_text)
            .map_err(|e| format!("Invalid schema {}: {}", args.schema, e))?,
    );
    let sources: Vec<Arc<dyn DocumentSource>> = args
        .documents
        .iter()
        .map(|path| Arc::new(JsonFile::new(path)) as Arc<dyn DocumentSource>)
        .collect();

    // Ids are collected while validating; resolution waits until every
    // document has been checked so all errors are reported.
    let mut handlers = build_handlers(&args, options.max_unique_ids)?;
    let validator = DocumentValidator::new(options.clone());
    let mut outcomes = Vec::with_capacity(sources.len());
    let mut reports = Vec::with_capacity(sources.len());
    for (document, (path, source)) in args.documents.iter().zip(&sources).enumerate() {
        let mut outcome = DocumentOutcome::new(path);
        match validator.validate_into(
            Arc::clone(&schema),
            Arc::clone(source),
            &mut handlers,
            IdOrigin::data(document),
        ) {
            Ok(report) => {
                outcome.errors = report.errors().to_vec();
                outcome.suppressed_errors = report.suppressed_errors();
                reports.push(report);
            }
            Err(ValidationAbort::IdReference(e)) => {
                return Err(format!("{}: {}", path, e).into());
            }
            Err(abort) => outcome.errors.push(abort.to_string()),
        }
        outcomes.push(outcome);
    }
    if outcomes.iter().any(|o| !o.is_valid()) {
        output::print_outcomes(&outcomes, args.json)?;
        std::process::exit(1);
    }

    let mut batch = ValidatedBatch::resolve(reports, handlers)?;
    let canonicalizer = Canonicalizer::new(options.canonical.clone());
    let checksums = batch.canonicalize_all(&canonicalizer)?;

    for (document, (outcome, result)) in outcomes.iter_mut().zip(checksums).enumerate() {
        let Some(report) = batch.report(document) else {
            continue;
        };
        for reference in report.id_references() {
            let resolved = batch
                .handlers()
                .remapped_id(reference.id_type(), reference.id())?;
            outcome.ids.push(IdLine {
                id_type: reference.id_type().to_string(),
                id: reference.id().to_string(),
                location: reference.location().to_string(),
                resolved: resolved.id.clone(),
            });
        }
        match result {
            Ok(checksum) => {
                outcome.checksum = Some(checksum.to_string());
                outcome.size = report.canonical_size();
            }
            Err(e) => outcome.errors.push(e.to_string()),
        }
    }
    info!(documents = outcomes.len(), "validated documents");

    output::print_outcomes(&outcomes, args.json)?;
    if outcomes.iter().any(|o| !o.is_valid()) {
        std::process::exit(1);
    }
    Ok(())
}

fn build_handlers(
    args: &Args,
    max_unique_ids: usize,
) -> Result<IdReferenceHandlerSet<IdOrigin>, Box<dyn std::error::Error>> {
    let mut builder = IdReferenceHandlerSet::builder(max_unique_ids);
    for arg in &args.ids {
        let (id_type, path) = split_ids_argument(arg)?;
        let resolver = StaticResolver::from_targets(load_id_map(path)?);
        builder = builder.with_handler(ResolvingHandler::new(
            IdReferenceType::parse(id_type)?,
            resolver,
        ));
    }
    for id_type in &args.identity {
        builder = builder.with_handler(IdentityHandler::new(IdReferenceType::parse(id_type.as_str())?));
    }
    Ok(builder.build())
}
