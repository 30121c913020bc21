//! Compiled schema trees.
//!
//! A schema document is compiled once into an immutable [`SchemaNode`] tree
//! that is shared (usually behind an `Arc`) by every validation using it.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

use crate::errors::SchemaError;
use crate::idref::IdReferenceType;
use crate::numeric::NumericValue;

/// Kind of value a schema node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// JSON string.
    String,
    /// JSON integer.
    Integer,
    /// JSON number (integer or float).
    Number,
}

impl SchemaKind {
    /// Name used in schema documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Object => "object",
            SchemaKind::Array => "array",
            SchemaKind::String => "string",
            SchemaKind::Integer => "integer",
            SchemaKind::Number => "number",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks a node's value (or, on objects, its keys) as ids of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdReferenceSpec {
    /// Reference type.
    pub id_type: IdReferenceType,
    /// Allowed target types; empty means any.
    pub attributes: Vec<String>,
}

/// How an object treats members that are not declared properties.
#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    /// Undeclared members are errors (the default).
    Forbidden,
    /// Undeclared members are accepted without checks.
    Allowed,
    /// Undeclared members are validated against this schema.
    Schema(Box<SchemaNode>),
}

/// Constraints of an object node.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    /// Declared members in schema order.
    pub properties: IndexMap<String, SchemaNode>,
    /// Treatment of undeclared members.
    pub additional: AdditionalProperties,
    /// Required member names in schema order.
    pub required: IndexSet<String>,
}

/// Element schema of an array node.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItems {
    /// Every element uses the same schema.
    Uniform(Box<SchemaNode>),
    /// Element `i` uses schema `i`; extra elements are not checked.
    Tuple(Vec<SchemaNode>),
}

/// Constraints of an array node.
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySchema {
    /// Element schemas.
    pub items: ArrayItems,
    /// Minimum element count.
    pub min_items: Option<u64>,
    /// Maximum element count.
    pub max_items: Option<u64>,
}

impl ArraySchema {
    /// Schema for the element at `index`, if one applies.
    pub fn item(&self, index: u64) -> Option<&SchemaNode> {
        match &self.items {
            ArrayItems::Uniform(node) => Some(node),
            ArrayItems::Tuple(nodes) => usize::try_from(index).ok().and_then(|i| nodes.get(i)),
        }
    }
}

/// One end of a numeric range.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericBound {
    /// Bound value.
    pub value: NumericValue,
    /// True when the bound itself is excluded.
    pub exclusive: bool,
}

/// Range constraints of an integer or number node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSchema {
    /// Lower bound.
    pub minimum: Option<NumericBound>,
    /// Upper bound.
    pub maximum: Option<NumericBound>,
}

/// Kind-specific constraints of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraints {
    /// Object constraints.
    Object(ObjectSchema),
    /// Array constraints.
    Array(ArraySchema),
    /// Strings carry no constraints.
    String,
    /// Integer range.
    Integer(RangeSchema),
    /// Number range.
    Number(RangeSchema),
}

/// One compiled schema position.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    /// Display name (`id`).
    pub id: Option<String>,
    /// Opaque source-type hint (`original-type`).
    pub original_type: Option<String>,
    /// Id reference marker (`id-reference`).
    pub id_reference: Option<IdReferenceSpec>,
    /// Metadata selector (`metadata-ws`), object nodes only.
    pub metadata_selection: Option<Value>,
    /// Kind-specific constraints.
    pub constraints: Constraints,
}

impl SchemaNode {
    /// Compiles a schema from JSON text.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    /// Compiles a schema from a parsed JSON value.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        compile(value, "")
    }

    /// Kind of value accepted here.
    pub fn kind(&self) -> SchemaKind {
        match self.constraints {
            Constraints::Object(_) => SchemaKind::Object,
            Constraints::Array(_) => SchemaKind::Array,
            Constraints::String => SchemaKind::String,
            Constraints::Integer(_) => SchemaKind::Integer,
            Constraints::Number(_) => SchemaKind::Number,
        }
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn invalid(path: &str, keyword: &'static str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidKeyword {
        path: display_path(path),
        keyword,
        reason: reason.into(),
    }
}

fn compile(value: &Value, path: &str) -> Result<SchemaNode, SchemaError> {
    let obj = value.as_object().ok_or_else(|| SchemaError::NotAnObject {
        path: display_path(path),
    })?;
    let type_name = match obj.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(invalid(path, "type", "must be a string")),
        None => {
            return Err(SchemaError::MissingType {
                path: display_path(path),
            })
        }
    };
    let constraints = match type_name {
        "object" => Constraints::Object(compile_object(obj, path)?),
        "array" => Constraints::Array(compile_array(obj, path)?),
        "string" => Constraints::String,
        "integer" => Constraints::Integer(compile_range(obj, path)?),
        "number" => Constraints::Number(compile_range(obj, path)?),
        other => {
            return Err(SchemaError::UnsupportedType {
                path: display_path(path),
                found: other.to_string(),
            })
        }
    };

    let id = match obj.get("id") {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(invalid(path, "id", "must be a string")),
    };
    let original_type = obj.get("original-type").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    let id_reference = obj
        .get("id-reference")
        .map(|v| compile_id_reference(v, path))
        .transpose()?;
    if id_reference.is_some() && matches!(constraints, Constraints::Array(_)) {
        return Err(invalid(path, "id-reference", "not allowed on array nodes"));
    }

    let metadata_selection = match obj.get("metadata-ws") {
        None => None,
        Some(selection @ Value::Object(_)) => {
            if !matches!(constraints, Constraints::Object(_)) {
                return Err(invalid(path, "metadata-ws", "only allowed on object nodes"));
            }
            Some(selection.clone())
        }
        Some(_) => return Err(invalid(path, "metadata-ws", "must be an object")),
    };

    Ok(SchemaNode {
        id,
        original_type,
        id_reference,
        metadata_selection,
        constraints,
    })
}

fn compile_object(obj: &Map<String, Value>, path: &str) -> Result<ObjectSchema, SchemaError> {
    let mut properties = IndexMap::new();
    match obj.get("properties") {
        None => {}
        Some(Value::Object(members)) => {
            for (name, child) in members {
                let child_path = format!("{path}/properties/{name}");
                properties.insert(name.clone(), compile(child, &child_path)?);
            }
        }
        Some(_) => return Err(invalid(path, "properties", "must be an object")),
    }

    let additional = match obj.get("additionalProperties") {
        None | Some(Value::Bool(false)) => AdditionalProperties::Forbidden,
        Some(Value::Bool(true)) => AdditionalProperties::Allowed,
        Some(child @ Value::Object(_)) => AdditionalProperties::Schema(Box::new(compile(
            child,
            &format!("{path}/additionalProperties"),
        )?)),
        Some(_) => {
            return Err(invalid(
                path,
                "additionalProperties",
                "must be a boolean or a schema",
            ))
        }
    };

    let mut required = IndexSet::new();
    match obj.get("required") {
        None => {}
        Some(Value::Array(names)) => {
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| invalid(path, "required", "entries must be strings"))?;
                required.insert(name.to_string());
            }
        }
        Some(_) => return Err(invalid(path, "required", "must be an array")),
    }

    Ok(ObjectSchema {
        properties,
        additional,
        required,
    })
}

fn compile_array(obj: &Map<String, Value>, path: &str) -> Result<ArraySchema, SchemaError> {
    let items = match obj.get("items") {
        Some(child @ Value::Object(_)) => {
            ArrayItems::Uniform(Box::new(compile(child, &format!("{path}/items"))?))
        }
        Some(Value::Array(children)) => ArrayItems::Tuple(
            children
                .iter()
                .enumerate()
                .map(|(i, child)| compile(child, &format!("{path}/items/{i}")))
                .collect::<Result<_, _>>()?,
        ),
        Some(_) => return Err(invalid(path, "items", "must be a schema or an array of schemas")),
        None => return Err(invalid(path, "items", "is required for arrays")),
    };
    let min_items = item_count(obj, "minItems", path)?;
    let max_items = item_count(obj, "maxItems", path)?;
    if let (Some(min), Some(max)) = (min_items, max_items) {
        if min > max {
            return Err(invalid(
                path,
                "minItems",
                format!("{min} is greater than maxItems {max}"),
            ));
        }
    }
    Ok(ArraySchema {
        items,
        min_items,
        max_items,
    })
}

fn item_count(
    obj: &Map<String, Value>,
    keyword: &'static str,
    path: &str,
) -> Result<Option<u64>, SchemaError> {
    match obj.get(keyword) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(path, keyword, "must be a non-negative integer")),
        Some(_) => Err(invalid(path, keyword, "must be a non-negative integer")),
    }
}

fn bound_value(
    value: &Value,
    keyword: &'static str,
    path: &str,
) -> Result<NumericValue, SchemaError> {
    let parsed = match value {
        Value::Number(n) => NumericValue::parse(&n.to_string()),
        Value::String(s) => NumericValue::parse(s),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(path, keyword, format!("{value} is not a number")))
}

fn compile_bound(
    obj: &Map<String, Value>,
    inclusive_key: &'static str,
    exclusive_key: &'static str,
    path: &str,
) -> Result<Option<NumericBound>, SchemaError> {
    let inclusive = obj
        .get(inclusive_key)
        .map(|v| bound_value(v, inclusive_key, path))
        .transpose()?;
    match (inclusive, obj.get(exclusive_key)) {
        (value, None) => Ok(value.map(|value| NumericBound {
            value,
            exclusive: false,
        })),
        (Some(value), Some(Value::Bool(exclusive))) => Ok(Some(NumericBound {
            value,
            exclusive: *exclusive,
        })),
        (None, Some(Value::Bool(false))) => Ok(None),
        (None, Some(Value::Bool(true))) => Err(invalid(
            path,
            exclusive_key,
            format!("requires '{inclusive_key}'"),
        )),
        (None, Some(other)) => Ok(Some(NumericBound {
            value: bound_value(other, exclusive_key, path)?,
            exclusive: true,
        })),
        (Some(_), Some(_)) => Err(invalid(
            path,
            exclusive_key,
            format!("a numeric bound conflicts with '{inclusive_key}'"),
        )),
    }
}

fn compile_range(obj: &Map<String, Value>, path: &str) -> Result<RangeSchema, SchemaError> {
    Ok(RangeSchema {
        minimum: compile_bound(obj, "minimum", "exclusiveMinimum", path)?,
        maximum: compile_bound(obj, "maximum", "exclusiveMaximum", path)?,
    })
}

fn compile_id_reference(value: &Value, path: &str) -> Result<IdReferenceSpec, SchemaError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(path, "id-reference", "must be an object"))?;
    let id_type = obj
        .get("id-type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(path, "id-reference", "'id-type' must be a string"))?;
    let id_type = IdReferenceType::parse(id_type)
        .map_err(|e| invalid(path, "id-reference", e.to_string()))?;

    let attributes = match (obj.get("attributes"), obj.get("valid-typedef-names")) {
        (Some(_), Some(_)) => {
            return Err(invalid(
                path,
                "id-reference",
                "'attributes' and 'valid-typedef-names' cannot both be set",
            ))
        }
        (Some(list), None) | (None, Some(list)) => string_list(list)
            .ok_or_else(|| invalid(path, "id-reference", "attribute lists must hold strings"))?,
        (None, None) => Vec::new(),
    };
    Ok(IdReferenceSpec {
        id_type,
        attributes,
    })
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use serde_json::json;

    #[test]
    fn test_compiles_nested_schema() {
        let schema = SchemaNode::from_json(&json!({
            "type": "object",
            "id": "Genome",
            "original-type": "KBaseGenomes.Genome",
            "properties": {
                "b": {"type": "string", "id-reference": {"id-type": "ws", "valid-typedef-names": ["Contig"]}},
                "a": {"type": "array", "items": {"type": "integer", "minimum": 0}, "maxItems": 3}
            },
            "required": ["a"],
            "metadata-ws": {"count": "length(a)"}
        }))
        .unwrap();
        assert_eq!(schema.kind(), SchemaKind::Object);
        assert_eq!(schema.id.as_deref(), Some("Genome"));
        let Constraints::Object(obj) = &schema.constraints else {
            panic!("not an object");
        };
        assert_eq!(obj.properties.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(obj.additional, AdditionalProperties::Forbidden);
        let b = &obj.properties["b"];
        let spec = b.id_reference.as_ref().unwrap();
        assert_eq!(spec.id_type.as_str(), "ws");
        assert_eq!(spec.attributes, vec!["Contig".to_string()]);
        let Constraints::Array(array) = &obj.properties["a"].constraints else {
            panic!("not an array");
        };
        assert_eq!(array.max_items, Some(3));
        assert_eq!(array.item(7).unwrap().kind(), SchemaKind::Integer);
    }

    #[test]
    fn test_big_bounds_keep_precision() {
        let schema = SchemaNode::parse(
            r#"{"type":"integer","minimum":-99999999999999999999999,"maximum":"99999999999999999999999"}"#,
        )
        .unwrap();
        let Constraints::Integer(range) = schema.constraints else {
            panic!("not an integer");
        };
        let min = range.minimum.unwrap();
        assert_eq!(
            min.value,
            NumericValue::Integer("-99999999999999999999999".parse::<BigInt>().unwrap())
        );
        assert!(!min.exclusive);
    }

    #[test]
    fn test_exclusive_bound_forms() {
        let schema = SchemaNode::from_json(&json!({
            "type": "number", "minimum": 1, "exclusiveMinimum": true, "exclusiveMaximum": 2.5
        }))
        .unwrap();
        let Constraints::Number(range) = schema.constraints else {
            panic!("not a number");
        };
        assert!(range.minimum.unwrap().exclusive);
        let max = range.maximum.unwrap();
        assert!(max.exclusive);
        assert_eq!(max.value, NumericValue::Float(2.5));
    }

    #[test]
    fn test_tuple_items() {
        let schema = SchemaNode::from_json(&json!({
            "type": "array", "items": [{"type": "string"}, {"type": "number"}]
        }))
        .unwrap();
        let Constraints::Array(array) = schema.constraints else {
            panic!("not an array");
        };
        assert_eq!(array.item(1).unwrap().kind(), SchemaKind::Number);
        assert!(array.item(2).is_none());
    }

    #[test]
    fn test_rejects_malformed_schemas() {
        let bad = [
            json!([]),
            json!({}),
            json!({"type": "boolean"}),
            json!({"type": "array"}),
            json!({"type": "array", "items": {"type": "string"}, "minItems": -1}),
            json!({"type": "array", "items": {"type": "string"}, "minItems": 3, "maxItems": 2}),
            json!({"type": "integer", "minimum": "ten"}),
            json!({"type": "integer", "exclusiveMinimum": true}),
            json!({"type": "string", "id-reference": {}}),
            json!({"type": "string", "id-reference": {"id-type": "ws", "attributes": [], "valid-typedef-names": []}}),
            json!({"type": "array", "items": {"type": "string"}, "id-reference": {"id-type": "ws"}}),
            json!({"type": "string", "metadata-ws": {"a": "b"}}),
            json!({"type": "object", "required": [1]}),
            json!({"type": "object", "properties": {"a": {"type": "nope"}}}),
        ];
        for schema in bad {
            assert!(SchemaNode::from_json(&schema).is_err(), "accepted {schema}");
        }
    }

    #[test]
    fn test_error_names_position() {
        let err = SchemaNode::from_json(&json!({
            "type": "object", "properties": {"a": {"type": "nope"}}
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "schema at /properties/a has unsupported type 'nope'"
        );
    }
}
