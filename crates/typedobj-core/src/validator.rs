//! Streaming schema validation.
//!
//! [`validate`] walks a compiled [`SchemaNode`] and a token stream in lock
//! step. Structural problems are reported to a [`ValidationSink`] and the walk
//! continues; malformed input and id bookkeeping failures abort it.
//! Subtrees without a schema are skipped iteratively, so recursion depth is
//! bounded by the schema rather than by the document.

use serde_json::Value;
use tracing::warn;
use typedobj_canonical::{Token, TokenSource};

use crate::errors::{IdReferenceHandlerError, ValidationAbort};
use crate::handlers::IdReferenceHandlerSet;
use crate::idref::IdReference;
use crate::location::{LocationTracker, Scope, Tracked};
use crate::numeric::NumericValue;
use crate::schema::{
    AdditionalProperties, ArraySchema, Constraints, ObjectSchema, RangeSchema, SchemaKind,
    SchemaNode,
};

/// Default cap on recorded error messages per document.
pub const DEFAULT_MAX_ERRORS: usize = 10_000;

/// Receives everything a validation pass discovers.
pub trait ValidationSink {
    /// A structural validation error.
    fn error(&mut self, message: String);

    /// An id found at a location marked by `id-reference`.
    fn id_reference(&mut self, reference: IdReference) -> Result<(), IdReferenceHandlerError>;

    /// The `metadata-ws` selection of an object node, signalled when the node is entered.
    fn metadata_selection(&mut self, _selection: &Value) {}
}

/// Validates one document against `schema`.
pub fn validate(
    schema: &SchemaNode,
    tokens: &mut dyn TokenSource,
    sink: &mut dyn ValidationSink,
) -> Result<(), ValidationAbort> {
    let mut walker = Walker {
        tokens,
        sink,
        location: LocationTracker::new(),
    };
    let root = walker.next()?;
    walker.value(schema, root)?;
    if walker.tokens.next_token()?.is_some() {
        return Err(ValidationAbort::TrailingContent);
    }
    Ok(())
}

struct Walker<'a> {
    tokens: &'a mut dyn TokenSource,
    sink: &'a mut dyn ValidationSink,
    location: LocationTracker,
}

impl Tracked for Walker<'_> {
    fn tracker(&mut self) -> &mut LocationTracker {
        &mut self.location
    }
}

fn type_name(token: &Token) -> &'static str {
    match token {
        Token::StartObject => "object",
        Token::EndObject => "object end",
        Token::StartArray => "array",
        Token::EndArray => "array end",
        Token::FieldName(_) => "object field",
        Token::String(_) => "string",
        Token::Int(_) | Token::BigInt(_) => "integer",
        Token::Float(_) => "float",
        Token::Bool(_) => "boolean",
        Token::Null => "null",
    }
}

impl Walker<'_> {
    fn next(&mut self) -> Result<Token, ValidationAbort> {
        match self.tokens.next_token()? {
            Some(token) => Ok(token),
            None => Err(ValidationAbort::Truncated {
                location: self.location.to_string(),
            }),
        }
    }

    fn misplaced(&self, token: &Token) -> Result<(), ValidationAbort> {
        if matches!(
            token,
            Token::FieldName(_) | Token::EndObject | Token::EndArray
        ) {
            return Err(ValidationAbort::UnexpectedToken {
                found: token.kind(),
                location: self.location.to_string(),
            });
        }
        Ok(())
    }

    fn mismatch(&mut self, expected: SchemaKind, token: &Token) {
        let message = format!(
            "instance type ({}) does not match any allowed primitive type (allowed: [\"{expected}\"]), at {}",
            type_name(token),
            self.location
        );
        self.sink.error(message);
    }

    /// Consumes the rest of the value that starts with `first`.
    fn skip(&mut self, first: &Token) -> Result<(), ValidationAbort> {
        self.misplaced(first)?;
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

    fn value(&mut self, schema: &SchemaNode, token: Token) -> Result<(), ValidationAbort> {
        self.misplaced(&token)?;
        match &schema.constraints {
            Constraints::Object(object) => self.object(schema, object, token),
            Constraints::Array(array) => self.array(array, token),
            Constraints::String => self.string(schema, token),
            Constraints::Integer(range) => self.number(SchemaKind::Integer, range, token),
            Constraints::Number(range) => self.number(SchemaKind::Number, range, token),
        }
    }

    fn object(
        &mut self,
        schema: &SchemaNode,
        object: &ObjectSchema,
        token: Token,
    ) -> Result<(), ValidationAbort> {
        if let Some(selection) = &schema.metadata_selection {
            self.sink.metadata_selection(selection);
        }
        if !matches!(token, Token::StartObject) {
            self.mismatch(SchemaKind::Object, &token);
            return self.skip(&token);
        }
        let here = self.location.to_string();
        let mut seen = vec![false; object.required.len()];

        let mut scope = Scope::enter(self);
        loop {
            let name = match scope.next()? {
                Token::EndObject => break,
                Token::FieldName(name) => name,
                other => {
                    return Err(ValidationAbort::UnexpectedToken {
                        found: other.kind(),
                        location: scope.location.to_string(),
                    })
                }
            };
            scope.location.set_field(&name);
            if let Some(index) = object.required.get_index_of(&name) {
                seen[index] = true;
            }

            let child = match object.properties.get(&name) {
                Some(child) => Some(child),
                None => {
                    if matches!(object.additional, AdditionalProperties::Forbidden)
                        && !object.properties.is_empty()
                    {
                        let allowed: Vec<&str> =
                            object.properties.keys().map(String::as_str).collect();
                        let message = format!(
                            "Object field name [{name}] is not in allowed object properties: [{}], at {}",
                            allowed.join(", "),
                            scope.location
                        );
                        scope.sink.error(message);
                    }
                    match &object.additional {
                        AdditionalProperties::Schema(child) => Some(child.as_ref()),
                        _ => None,
                    }
                }
            };
            let value = scope.next()?;
            match child {
                Some(child) => scope.value(child, value)?,
                None => scope.skip(&value)?,
            }

            // Keys are ids too; recorded after their value so deeper ids come first.
            if let Some(spec) = &schema.id_reference {
                let reference = IdReference::new(
                    spec.id_type.clone(),
                    name,
                    scope.location.snapshot(),
                    true,
                    spec.attributes.clone(),
                );
                scope.sink.id_reference(reference)?;
            }
        }
        drop(scope);

        let missing: Vec<&str> = object
            .required
            .iter()
            .zip(&seen)
            .filter(|(_, seen)| !**seen)
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            self.sink.error(format!(
                "Object doesn't have required fields : [{}], at {here}",
                missing.join(", ")
            ));
        }
        Ok(())
    }

    fn array(&mut self, array: &ArraySchema, token: Token) -> Result<(), ValidationAbort> {
        if !matches!(token, Token::StartArray) {
            self.mismatch(SchemaKind::Array, &token);
            return self.skip(&token);
        }
        let here = self.location.to_string();
        let mut count: u64 = 0;
        let mut over_limit = false;

        let mut scope = Scope::enter(self);
        loop {
            let element = scope.next()?;
            if matches!(element, Token::EndArray) {
                break;
            }
            scope.location.set_index(count);
            if let Some(max) = array.max_items {
                if !over_limit && count >= max {
                    scope
                        .sink
                        .error(format!("Array contains more than {max} items, at {here}"));
                    over_limit = true;
                }
            }
            match array.item(count) {
                Some(item) if !over_limit => scope.value(item, element)?,
                _ => scope.skip(&element)?,
            }
            count += 1;
        }
        drop(scope);

        if let Some(min) = array.min_items {
            if count < min {
                self.sink
                    .error(format!("Array contains less than {min} items, at {here}"));
            }
        }
        Ok(())
    }

    fn string(&mut self, schema: &SchemaNode, token: Token) -> Result<(), ValidationAbort> {
        let Some(spec) = &schema.id_reference else {
            if !matches!(token, Token::String(_) | Token::Null) {
                self.mismatch(SchemaKind::String, &token);
                return self.skip(&token);
            }
            return Ok(());
        };
        match token {
            Token::String(id) => {
                let reference = IdReference::new(
                    spec.id_type.clone(),
                    id,
                    self.location.snapshot(),
                    false,
                    spec.attributes.clone(),
                );
                self.sink.id_reference(reference)?;
                Ok(())
            }
            other => {
                let message = format!(
                    "instance type ({}) not allowed for ID reference (allowed: [\"string\"]), at {}",
                    type_name(&other),
                    self.location
                );
                self.sink.error(message);
                self.skip(&other)
            }
        }
    }

    fn number(
        &mut self,
        kind: SchemaKind,
        range: &RangeSchema,
        token: Token,
    ) -> Result<(), ValidationAbort> {
        let accepted = match token {
            Token::Null => return Ok(()),
            Token::Int(_) | Token::BigInt(_) => true,
            Token::Float(_) => kind == SchemaKind::Number,
            _ => false,
        };
        if !accepted {
            self.mismatch(kind, &token);
            return self.skip(&token);
        }
        if let Some(value) = NumericValue::from_token(&token) {
            self.check_range(range, &value);
        }
        Ok(())
    }

    fn check_range(&mut self, range: &RangeSchema, value: &NumericValue) {
        use std::cmp::Ordering;

        fn inclusivity(exclusive: bool) -> &'static str {
            if exclusive {
                "exclusive"
            } else {
                "inclusive"
            }
        }

        if let Some(min) = &range.minimum {
            let order = value.compare(&min.value);
            if order == Ordering::Less || (min.exclusive && order == Ordering::Equal) {
                let message = format!(
                    "Number value given ({value}) was less than minimum value accepted ({}, {}) at {}",
                    min.value,
                    inclusivity(min.exclusive),
                    self.location
                );
                self.sink.error(message);
            }
        }
        if let Some(max) = &range.maximum {
            let order = value.compare(&max.value);
            if order == Ordering::Greater || (max.exclusive && order == Ordering::Equal) {
                let message = format!(
                    "Number value given ({value}) was more than maximum value accepted ({}, {}) at {}",
                    max.value,
                    inclusivity(max.exclusive),
                    self.location
                );
                self.sink.error(message);
            }
        }
    }
}

/// What a [`ReportCollector`] gathered from one pass.
#[derive(Debug, Clone, Default)]
pub struct CollectedReport {
    /// Recorded error messages, in discovery order.
    pub errors: Vec<String>,
    /// Errors dropped after `max_errors` was reached.
    pub suppressed_errors: usize,
    /// Ids in discovery order.
    pub id_references: Vec<IdReference>,
    /// `metadata-ws` selection of the first object entered that declares one.
    pub metadata_selection: Option<Value>,
}

/// Standard sink: bounded error list, ids, metadata selections.
///
/// A forwarding collector also adds each id to a handler set under a fixed
/// association, so the batch-wide id cap fails fast during validation.
pub struct ReportCollector<'h, T> {
    max_errors: usize,
    report: CollectedReport,
    forward: Option<(&'h mut IdReferenceHandlerSet<T>, T)>,
}

impl ReportCollector<'static, ()> {
    /// Collector that keeps ids to itself.
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            report: CollectedReport::default(),
            forward: None,
        }
    }
}

impl<'h, T> ReportCollector<'h, T> {
    /// Collector that also adds every id to `handlers` under `origin`.
    pub fn forwarding(max_errors: usize, handlers: &'h mut IdReferenceHandlerSet<T>, origin: T) -> Self {
        Self {
            max_errors,
            report: CollectedReport::default(),
            forward: Some((handlers, origin)),
        }
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> &[String] {
        &self.report.errors
    }

    /// Ids recorded so far.
    pub fn id_references(&self) -> &[IdReference] {
        &self.report.id_references
    }

    /// Releases the gathered data.
    pub fn finish(self) -> CollectedReport {
        if self.report.suppressed_errors > 0 {
            warn!(
                recorded = self.report.errors.len(),
                suppressed = self.report.suppressed_errors,
                "error limit reached; further errors were dropped"
            );
        }
        self.report
    }
}

impl<T> ValidationSink for ReportCollector<'_, T> {
    fn error(&mut self, message: String) {
        if self.report.errors.len() < self.max_errors {
            self.report.errors.push(message);
        } else {
            self.report.suppressed_errors += 1;
        }
    }

    fn id_reference(&mut self, reference: IdReference) -> Result<(), IdReferenceHandlerError> {
        if let Some((handlers, origin)) = &mut self.forward {
            handlers.add(origin, &reference)?;
        }
        self.report.id_references.push(reference);
        Ok(())
    }

    fn metadata_selection(&mut self, selection: &Value) {
        if self.report.metadata_selection.is_none() {
            self.report.metadata_selection = Some(selection.clone());
        }
    }
}
