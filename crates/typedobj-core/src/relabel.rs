//! Substitution of resolved ids into a document.
//!
//! A [`RelabelPlan`] maps recorded id locations to their replacements. Every
//! entry is addressed by the *original* path, and the rewriter tracks original
//! paths while streaming, so renaming a shallow key can never disturb the
//! address of a deeper one. Plan entries are assembled deepest-first.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;
use typedobj_canonical::{Token, TokenKind, TokenSink, TokenSource};

use crate::errors::RelabelError;
use crate::handlers::IdReferenceHandlerSet;
use crate::idref::IdReference;
use crate::location::{LocationPath, LocationTracker, PathSegment};

/// Result of one relabeling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelabelOutcome {
    /// True when every object of the output has strictly increasing keys.
    pub naturally_sorted: bool,
    /// Object keys replaced.
    pub keys_rewritten: u64,
    /// String values replaced.
    pub values_rewritten: u64,
}

/// Replacement text for every recorded id location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelabelPlan {
    values: HashMap<LocationPath, String>,
    keys: HashMap<LocationPath, BTreeMap<String, String>>,
    // Containers that hold a planned entry somewhere below them.
    containers: HashSet<LocationPath>,
}

impl RelabelPlan {
    /// Builds a plan from recorded references and a processed handler set.
    pub fn build<T>(
        references: &[IdReference],
        handlers: &IdReferenceHandlerSet<T>,
    ) -> Result<Self, RelabelError> {
        let mut ordered: Vec<&IdReference> = references.iter().collect();
        ordered.sort_by(|a, b| b.location().depth().cmp(&a.location().depth()));

        let mut plan = Self::default();
        for reference in ordered {
            let remapped = handlers.remapped_id(reference.id_type(), reference.id())?;
            plan.insert(reference, remapped.id.clone())?;
        }
        Ok(plan)
    }

    /// Adds one replacement.
    pub fn insert(&mut self, reference: &IdReference, replacement: String) -> Result<(), RelabelError> {
        let location = reference.location();
        if !reference.is_field_name() {
            self.values.insert(location.clone(), replacement);
            self.mark_ancestors(location);
            return Ok(());
        }
        match location.last() {
            Some(PathSegment::Field(original)) => {
                let object = location.parent();
                self.mark_ancestors(&object);
                self.keys
                    .entry(object)
                    .or_default()
                    .insert(original.clone(), replacement);
                Ok(())
            }
            _ => Err(RelabelError::LocationMismatch {
                location: location.clone(),
                found: TokenKind::FieldName,
            }),
        }
    }

    fn mark_ancestors(&mut self, location: &LocationPath) {
        let mut current = location.clone();
        while !current.is_root() {
            current = current.parent();
            if !self.containers.insert(current.clone()) {
                break;
            }
        }
    }

    /// True when nothing would be rewritten.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.keys.is_empty()
    }

    /// Number of planned substitutions.
    pub fn len(&self) -> usize {
        self.values.len() + self.keys.values().map(BTreeMap::len).sum::<usize>()
    }

    /// Streams `source` into `sink`, substituting planned ids.
    pub fn apply(
        &self,
        source: &mut dyn TokenSource,
        sink: &mut dyn TokenSink,
    ) -> Result<RelabelOutcome, RelabelError> {
        let mut rewriter = Rewriter::new(self);
        rewriter.run(source, sink)?;
        debug!(
            keys = rewriter.outcome.keys_rewritten,
            values = rewriter.outcome.values_rewritten,
            sorted = rewriter.outcome.naturally_sorted,
            "relabeled document"
        );
        Ok(rewriter.outcome)
    }
}

/// Builds a plan from `references` and streams `source` through it into `sink`.
pub fn relabel<T>(
    source: &mut dyn TokenSource,
    references: &[IdReference],
    handlers: &IdReferenceHandlerSet<T>,
    sink: &mut dyn TokenSink,
) -> Result<RelabelOutcome, RelabelError> {
    RelabelPlan::build(references, handlers)?.apply(source, sink)
}

enum Frame<'p> {
    Object {
        renames: Option<&'p BTreeMap<String, String>>,
        emitted: HashSet<String>,
        last_key: Option<String>,
        planned: bool,
    },
    Array {
        next_index: u64,
        planned: bool,
    },
}

impl Frame<'_> {
    fn planned(&self) -> bool {
        match self {
            Frame::Object { planned, .. } | Frame::Array { planned, .. } => *planned,
        }
    }
}

struct Rewriter<'p> {
    plan: &'p RelabelPlan,
    location: LocationTracker,
    frames: Vec<Frame<'p>>,
    outcome: RelabelOutcome,
    // Paths materialized for plan lookups.
    snapshots: u64,
}

impl<'p> Rewriter<'p> {
    fn new(plan: &'p RelabelPlan) -> Self {
        Self {
            plan,
            location: LocationTracker::new(),
            frames: Vec::new(),
            outcome: RelabelOutcome {
                naturally_sorted: true,
                ..RelabelOutcome::default()
            },
            snapshots: 0,
        }
    }

    fn run(&mut self, source: &mut dyn TokenSource, sink: &mut dyn TokenSink) -> Result<(), RelabelError> {
        let mut started = false;
        while let Some(token) = source.next_token()? {
            started = true;
            self.token(token, sink)?;
        }
        if !started || !self.frames.is_empty() {
            return Err(RelabelError::Truncated);
        }
        sink.flush()?;
        Ok(())
    }

    fn token(&mut self, token: Token, sink: &mut dyn TokenSink) -> Result<(), RelabelError> {
        match token {
            Token::FieldName(name) => self.key(name, sink),
            end @ (Token::EndObject | Token::EndArray) => {
                self.frames.pop();
                self.location.leave();
                sink.write_token(&end)?;
                Ok(())
            }
            value => self.value(value, sink),
        }
    }

    fn key(&mut self, name: String, sink: &mut dyn TokenSink) -> Result<(), RelabelError> {
        self.location.set_field(&name);
        let Some(Frame::Object {
            renames,
            emitted,
            last_key,
            ..
        }) = self.frames.last_mut()
        else {
            return Err(RelabelError::LocationMismatch {
                location: self.location.snapshot(),
                found: TokenKind::FieldName,
            });
        };

        let mut output = name;
        if let Some(renames) = renames {
            if let Some(replacement) = renames.get(&output) {
                if *replacement != output {
                    self.outcome.keys_rewritten += 1;
                }
                output = replacement.clone();
            }
            if !emitted.insert(output.clone()) {
                return Err(RelabelError::KeyCollision {
                    key: output,
                    location: self.location.snapshot().parent(),
                });
            }
        }
        if let Some(previous) = last_key {
            if previous.as_bytes() >= output.as_bytes() {
                self.outcome.naturally_sorted = false;
            }
        }
        *last_key = Some(output.clone());
        sink.write_token(&Token::FieldName(output))?;
        Ok(())
    }

    fn value(&mut self, token: Token, sink: &mut dyn TokenSink) -> Result<(), RelabelError> {
        if let Some(Frame::Array { next_index, .. }) = self.frames.last_mut() {
            self.location.set_index(*next_index);
            *next_index += 1;
        }
        let plan = self.plan;
        let enclosing_planned = match self.frames.last() {
            Some(frame) => frame.planned(),
            None => !plan.is_empty(),
        };
        let here = if enclosing_planned {
            self.snapshots += 1;
            Some(self.location.snapshot())
        } else {
            None
        };
        let planned = here.as_ref().is_some_and(|h| plan.containers.contains(h));

        if let Some(replacement) = here.as_ref().and_then(|h| plan.values.get(h)) {
            let Token::String(original) = &token else {
                return Err(RelabelError::LocationMismatch {
                    location: self.location.snapshot(),
                    found: token.kind(),
                });
            };
            if original != replacement {
                self.outcome.values_rewritten += 1;
            }
            sink.write_token(&Token::String(replacement.clone()))?;
            return Ok(());
        }

        match token {
            Token::StartObject => {
                let renames = here.as_ref().and_then(|h| plan.keys.get(h));
                self.frames.push(Frame::Object {
                    renames,
                    emitted: HashSet::new(),
                    last_key: None,
                    planned,
                });
                self.location.enter();
            }
            Token::StartArray => {
                self.frames.push(Frame::Array {
                    next_index: 0,
                    planned,
                });
                self.location.enter();
            }
            _ => {}
        }
        sink.write_token(&token)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ResolvingHandler;
    use crate::idref::IdReferenceType;
    use crate::resolver::StaticResolver;
    use typedobj_canonical::{JsonTokenReader, JsonTokenWriter};

    fn ws() -> IdReferenceType {
        IdReferenceType::parse("ws").unwrap()
    }

    fn path(segments: &[&str]) -> LocationPath {
        LocationPath::from_segments(
            segments
                .iter()
                .map(|s| match s.parse::<u64>() {
                    Ok(i) => PathSegment::Index(i),
                    Err(_) => PathSegment::Field(s.to_string()),
                })
                .collect(),
        )
    }

    fn processed(resolver: StaticResolver, refs: &[IdReference]) -> IdReferenceHandlerSet<u32> {
        let mut set = IdReferenceHandlerSet::builder(100)
            .with_handler(ResolvingHandler::new(ws(), resolver))
            .build();
        for r in refs {
            set.add(&0, r).unwrap();
        }
        set.process().unwrap();
        set
    }

    fn run(doc: &str, refs: &[IdReference], set: &IdReferenceHandlerSet<u32>) -> Result<(String, RelabelOutcome), RelabelError> {
        let mut source = JsonTokenReader::new(doc.as_bytes());
        let mut writer = JsonTokenWriter::new(Vec::new());
        let outcome = relabel(&mut source, refs, set, &mut writer)?;
        Ok((String::from_utf8(writer.into_inner()).unwrap(), outcome))
    }

    #[test]
    fn test_values_and_keys_are_replaced() {
        let refs = vec![
            IdReference::new(ws(), "g", path(&["genome"]), false, vec![]),
            IdReference::new(ws(), "c", path(&["m", "c"]), true, vec![]),
            IdReference::new(ws(), "g", path(&["list", "1"]), false, vec![]),
        ];
        let set = processed(
            StaticResolver::new()
                .with_target("g", "1/1/1", "Genome")
                .with_target("c", "1/2/1", "Contig"),
            &refs,
        );
        let (out, outcome) = run(
            r#"{"genome":"g","list":["x","g"],"m":{"c":"g","d":1}}"#,
            &refs,
            &set,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"{"genome":"1/1/1","list":["x","1/1/1"],"m":{"1/2/1":"g","d":1}}"#
        );
        assert_eq!(outcome.keys_rewritten, 1);
        assert_eq!(outcome.values_rewritten, 2);
        assert!(outcome.naturally_sorted);
    }

    #[test]
    fn test_paths_are_only_materialized_near_planned_entries() {
        let refs = vec![IdReference::new(ws(), "g", path(&["m", "c"]), false, vec![])];
        let set = processed(StaticResolver::new().with_target("g", "1/1/1", "T"), &refs);
        let plan = RelabelPlan::build(&refs, &set).unwrap();

        let numbers: Vec<String> = (0..1000).map(|i| i.to_string()).collect();
        let doc = format!(
            r#"{{"big":[{}],"deep":{{"x":{{"y":[1,2]}}}},"m":{{"c":"g"}}}}"#,
            numbers.join(",")
        );
        let mut source = JsonTokenReader::new(doc.as_bytes());
        let mut writer = JsonTokenWriter::new(Vec::new());
        let mut rewriter = Rewriter::new(&plan);
        rewriter.run(&mut source, &mut writer).unwrap();

        // The root, its three members and the planned string.
        assert_eq!(rewriter.snapshots, 5);
        assert_eq!(rewriter.outcome.values_rewritten, 1);
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert!(out.ends_with(r#""m":{"c":"1/1/1"}}"#));
    }

    #[test]
    fn test_rename_can_unsort() {
        let refs = vec![IdReference::new(ws(), "a", path(&["a"]), true, vec![])];
        let set = processed(StaticResolver::new().with_target("a", "z", "T"), &refs);
        let (out, outcome) = run(r#"{"a":1,"b":2}"#, &refs, &set).unwrap();
        assert_eq!(out, r#"{"z":1,"b":2}"#);
        assert!(!outcome.naturally_sorted);
    }

    #[test]
    fn test_nested_key_renames_are_order_independent() {
        let outer = IdReference::new(ws(), "k1", path(&["m", "k1"]), true, vec![]);
        let inner = IdReference::new(ws(), "k2", path(&["m", "k1", "x", "k2"]), true, vec![]);
        let resolver = || {
            StaticResolver::new()
                .with_target("k1", "K1", "T")
                .with_target("k2", "K2", "T")
        };
        let doc = r#"{"m":{"k1":{"x":{"k2":true}}}}"#;
        let forward = [outer.clone(), inner.clone()];
        let backward = [inner, outer];
        let (a, _) = run(doc, &forward, &processed(resolver(), &forward)).unwrap();
        let (b, _) = run(doc, &backward, &processed(resolver(), &backward)).unwrap();
        assert_eq!(a, r#"{"m":{"K1":{"x":{"K2":true}}}}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_collision_is_an_error() {
        let refs = vec![
            IdReference::new(ws(), "a", path(&["m", "a"]), true, vec![]),
            IdReference::new(ws(), "b", path(&["m", "b"]), true, vec![]),
        ];
        let set = processed(
            StaticResolver::new()
                .with_target("a", "same", "T")
                .with_target("b", "same", "T"),
            &refs,
        );
        match run(r#"{"m":{"a":1,"b":2}}"#, &refs, &set).unwrap_err() {
            RelabelError::KeyCollision { key, location } => {
                assert_eq!(key, "same");
                assert_eq!(location.to_string(), "/m");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_location_must_hold_a_string() {
        let refs = vec![IdReference::new(ws(), "g", path(&["v"]), false, vec![])];
        let set = processed(StaticResolver::new().with_target("g", "1/1/1", "T"), &refs);
        let err = run(r#"{"v":5}"#, &refs, &set).unwrap_err();
        assert!(matches!(err, RelabelError::LocationMismatch { .. }));
    }

    #[test]
    fn test_unprocessed_handlers_are_rejected() {
        let refs = vec![IdReference::new(ws(), "g", path(&["v"]), false, vec![])];
        let set = IdReferenceHandlerSet::<u32>::builder(10)
            .with_handler(ResolvingHandler::new(ws(), StaticResolver::new()))
            .build();
        assert!(matches!(
            run(r#"{"v":"g"}"#, &refs, &set).unwrap_err(),
            RelabelError::Handler(_)
        ));
    }
}
