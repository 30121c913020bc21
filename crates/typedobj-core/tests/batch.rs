use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use typedobj_canonical::{
    Canonicalizer, CanonicalizerOptions, DocumentSource, JsonBytes, TokenError, TokenSource,
};
use typedobj_core::{
    BatchDocument, BatchError, BatchValidator, DocumentValidator, EngineOptions, IdOrigin,
    IdReferenceErrorKind, IdReferenceHandlerError, IdReferenceHandlerSet, IdReferenceType,
    IdentityHandler, ResolvingHandler, SchemaNode, StaticResolver, ValidatedBatch,
};

fn ws() -> IdReferenceType {
    IdReferenceType::parse("ws").unwrap()
}

fn handle() -> IdReferenceType {
    IdReferenceType::parse("handle").unwrap()
}

fn make_schema() -> Arc<SchemaNode> {
    Arc::new(
        SchemaNode::from_json(&json!({
            "type": "object",
            "properties": {
                "refs": {
                    "type": "array",
                    "items": {"type": "string", "id-reference": {"id-type": "ws", "attributes": ["Genome", "Contig"]}}
                },
                "handle": {"type": "string", "id-reference": {"id-type": "handle"}},
                "by_ref": {
                    "type": "object",
                    "id-reference": {"id-type": "ws"},
                    "additionalProperties": {"type": "integer"}
                }
            }
        }))
        .unwrap(),
    )
}

fn make_resolver() -> Arc<StaticResolver> {
    Arc::new(
        StaticResolver::new()
            .with_target("genome", "1/1/1", "Genome")
            .with_target("contig", "1/2/3", "Contig")
            .with_target("other", "1/3/1", "Contig")
            .with_target("assembly", "1/4/1", "Assembly"),
    )
}

fn make_handlers(resolver: &Arc<StaticResolver>, max: usize) -> IdReferenceHandlerSet<IdOrigin> {
    IdReferenceHandlerSet::builder(max)
        .with_handler(ResolvingHandler::new(ws(), Arc::clone(resolver)))
        .with_handler(IdentityHandler::new(handle()))
        .build()
}

fn doc(json: &str) -> BatchDocument {
    let source: Arc<dyn DocumentSource> = Arc::new(JsonBytes::new(json));
    BatchDocument::new(make_schema(), source)
}

fn make_canonicalizer() -> Canonicalizer {
    Canonicalizer::new(CanonicalizerOptions::default())
}

#[test]
fn test_one_resolver_call_for_the_whole_batch() {
    let resolver = make_resolver();
    let documents = vec![
        doc(r#"{"refs":["genome","contig"],"handle":"KBH_1"}"#),
        doc(r#"{"refs":["contig"],"by_ref":{"other":1}}"#),
        doc(r#"{"refs":["genome"]}"#),
    ];
    let batch = BatchValidator::default()
        .validate(&documents, make_handlers(&resolver, 100))
        .unwrap();
    assert_eq!(resolver.call_count(), 1);
    assert_eq!(batch.len(), 3);
    // Unique per (document, id): genome, contig, KBH_1 | contig, other | genome.
    assert_eq!(batch.handlers().unique_id_count(), 6);

    let for_second = batch
        .handlers()
        .remapped_ids_for(&ws(), &IdOrigin::data(1))
        .unwrap();
    let ids: Vec<&str> = for_second.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1/2/3", "1/3/1"]);
}

#[test]
fn test_relabeled_documents_canonicalize_deterministically() {
    let resolver = make_resolver();
    let documents = vec![
        doc(r#"{"refs":["genome"],"by_ref":{"contig":2,"other":1},"handle":"h"}"#),
        doc(r#"{"handle":"h","by_ref":{"other":1,"contig":2},"refs":["genome"]}"#),
    ];
    let mut batch = BatchValidator::default()
        .validate(&documents, make_handlers(&resolver, 100))
        .unwrap();
    let results = batch.canonicalize_all(&make_canonicalizer()).unwrap();
    let first = results[0].as_ref().unwrap();
    let second = results[1].as_ref().unwrap();
    assert_eq!(first, second);

    let canonical = batch.report(0).unwrap().canonical().unwrap().to_vec().unwrap();
    assert_eq!(
        String::from_utf8(canonical).unwrap(),
        r#"{"by_ref":{"1/2/3":2,"1/3/1":1},"handle":"h","refs":["1/1/1"]}"#
    );
}

#[test]
fn test_cap_is_enforced_across_documents() {
    let resolver = make_resolver();
    let documents = vec![
        doc(r#"{"refs":["genome","contig"]}"#),
        doc(r#"{"refs":["genome","contig"]}"#),
    ];
    let err = BatchValidator::default()
        .validate(&documents, make_handlers(&resolver, 3))
        .unwrap_err();
    assert!(matches!(
        err,
        BatchError::Handler(IdReferenceHandlerError::TooManyIds { max: 3 })
    ));
    assert_eq!(resolver.call_count(), 0);
}

#[test]
fn test_unresolvable_id_is_attributed_to_its_document() {
    let resolver = make_resolver();
    let documents = vec![
        doc(r#"{"refs":["genome"]}"#),
        doc(r#"{"refs":["contig","ghost"]}"#),
    ];
    let err = BatchValidator::default()
        .validate(&documents, make_handlers(&resolver, 100))
        .unwrap_err();
    match &err {
        BatchError::Reference {
            document,
            provenance,
            location,
            source,
        } => {
            assert_eq!(*document, Some(1));
            assert!(!provenance);
            assert_eq!(location.as_ref().unwrap().to_string(), "/refs/1");
            assert_eq!(source.kind, IdReferenceErrorKind::NotFound);
            assert_eq!(source.id, "ghost");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().starts_with("document 1 at /refs/1: "));
}

#[test]
fn test_disallowed_target_type() {
    let resolver = make_resolver();
    let err = BatchValidator::default()
        .validate(&[doc(r#"{"refs":["assembly"]}"#)], make_handlers(&resolver, 100))
        .unwrap_err();
    let BatchError::Reference { source, .. } = err else {
        panic!("expected a reference error");
    };
    assert_eq!(
        source.kind,
        IdReferenceErrorKind::TypeNotAllowed {
            actual: "Assembly".to_string(),
            allowed: vec!["Genome".to_string(), "Contig".to_string()],
        }
    );
}

#[test]
fn test_provenance_ids_are_resolved_with_the_batch() {
    let resolver = make_resolver();
    let documents = vec![
        doc(r#"{"refs":[]}"#).with_provenance_id(ws(), "genome"),
        doc(r#"{"refs":[]}"#).with_provenance_id(ws(), "missing"),
    ];
    let err = BatchValidator::default()
        .validate(&documents, make_handlers(&resolver, 100))
        .unwrap_err();
    match err {
        BatchError::Reference {
            document,
            provenance,
            location,
            ..
        } => {
            assert_eq!(document, Some(1));
            assert!(provenance);
            assert!(location.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }

    let batch = BatchValidator::default()
        .validate(&documents[..1], make_handlers(&resolver, 100))
        .unwrap();
    let remapped = batch
        .handlers()
        .remapped_ids_for(&ws(), &IdOrigin::provenance(0))
        .unwrap();
    assert_eq!(remapped.len(), 1);
}

#[test]
fn test_invalid_and_malformed_documents_stop_the_batch() {
    let resolver = make_resolver();
    let err = BatchValidator::default()
        .validate(
            &[doc(r#"{"refs":[]}"#), doc(r#"{"refs":[1],"extra":true}"#)],
            make_handlers(&resolver, 100),
        )
        .unwrap_err();
    match err {
        BatchError::InvalidDocument { document, errors } => {
            assert_eq!(document, 1);
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = BatchValidator::default()
        .validate(&[doc(r#"{"refs":[}"#)], make_handlers(&resolver, 100))
        .unwrap_err();
    match err {
        BatchError::Document { document, source } => {
            assert_eq!(document, 0);
            assert!(source.is_parse_error());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(resolver.call_count(), 0);
}

#[test]
fn test_collision_fails_only_its_document() {
    let resolver = Arc::new(
        StaticResolver::new()
            .with_target("a", "same", "Genome")
            .with_target("b", "same", "Genome")
            .with_target("genome", "1/1/1", "Genome"),
    );
    let documents = vec![
        doc(r#"{"by_ref":{"a":1,"b":2}}"#),
        doc(r#"{"refs":["genome"]}"#),
    ];
    let mut batch = BatchValidator::new(EngineOptions::default())
        .validate(&documents, make_handlers(&resolver, 100))
        .unwrap();
    let results = batch.canonicalize_all(&make_canonicalizer()).unwrap();
    assert!(matches!(
        results[0],
        Err(BatchError::Canonicalization { document: 0, .. })
    ));
    assert!(results[1].is_ok());
    assert!(batch.report(0).unwrap().canonical().is_none());
}

#[derive(Debug)]
struct CountingSource {
    inner: JsonBytes,
    opens: AtomicUsize,
}

impl DocumentSource for CountingSource {
    fn open(&self) -> Result<Box<dyn TokenSource + '_>, TokenError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open()
    }
}

#[test]
fn test_resolving_existing_reports_reads_each_document_once_per_stage() {
    let resolver = make_resolver();
    let sources: Vec<Arc<CountingSource>> = [r#"{"refs":["genome"]}"#, r#"{"by_ref":{"other":1}}"#]
        .iter()
        .map(|json| {
            Arc::new(CountingSource {
                inner: JsonBytes::new(*json),
                opens: AtomicUsize::new(0),
            })
        })
        .collect();

    let mut handlers = make_handlers(&resolver, 100);
    let validator = DocumentValidator::default();
    let reports: Vec<_> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let source: Arc<dyn DocumentSource> = source.clone();
            validator
                .validate_into(make_schema(), source, &mut handlers, IdOrigin::data(i))
                .unwrap()
        })
        .collect();

    let mut batch = ValidatedBatch::resolve(reports, handlers).unwrap();
    assert_eq!(resolver.call_count(), 1);
    let results = batch.canonicalize_all(&make_canonicalizer()).unwrap();
    assert!(results.iter().all(Result::is_ok));
    for source in &sources {
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
    }
    assert_eq!(
        batch.report(1).unwrap().canonical().unwrap().to_vec().unwrap(),
        br#"{"by_ref":{"1/3/1":1}}"#.to_vec()
    );
}

#[test]
fn test_resolving_rejects_an_invalid_report() {
    let resolver = make_resolver();
    let mut handlers = make_handlers(&resolver, 100);
    let source: Arc<dyn DocumentSource> = Arc::new(JsonBytes::new(r#"{"refs":[1]}"#));
    let report = DocumentValidator::default()
        .validate_into(make_schema(), source, &mut handlers, IdOrigin::data(0))
        .unwrap();
    let err = ValidatedBatch::resolve(vec![report], handlers).unwrap_err();
    assert!(matches!(err, BatchError::InvalidDocument { document: 0, .. }));
    assert_eq!(resolver.call_count(), 0);
}
