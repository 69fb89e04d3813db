//! Dictionary-backed document nodes
//!
//! A [`Node`] is one schema-governed mapping in a data model tree. It may
//! carry a tag naming its document type and, once bound, the schema
//! fragment describing its keys. Assignment through [`Node::set`] checks
//! the new value against that fragment before committing it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::config;
use crate::error::{DataModelError, Result};
use crate::ndarray::NdArray;
use crate::schema::property_fragment;
use crate::tag::NDARRAY_TAG;
use crate::validator::{JsonSchemaValidator, Validator};

/// Keys starting with this character are reserved
pub const RESERVED_PREFIX: char = '_';

/// Key under which a projected array records its tag
pub const PROJECTED_TAG_KEY: &str = "_tag";

/// A value stored in a node
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(NdArray),
    List(Vec<Value>),
    Node(Node),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Array(_) => "ndarray",
            Value::List(_) => "list",
            Value::Node(_) => "node",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats only; integers are not widened
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// JSON projection seen by the schema engine
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::Array(a) => {
                let mut map = serde_json::Map::new();
                map.insert(PROJECTED_TAG_KEY.to_string(), json!(NDARRAY_TAG));
                map.insert("datatype".to_string(), json!(a.dtype().name()));
                map.insert("byteorder".to_string(), json!("little"));
                map.insert("shape".to_string(), json!(a.shape()));
                JsonValue::Object(map)
            }
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Node(n) => n.to_json(),
        }
    }

    fn attach_schema(&mut self, schema: Arc<JsonValue>) {
        match self {
            Value::Node(n) => n.attach_schema(schema),
            Value::List(items) => {
                if let Some(item_schema) = schema.get("items").filter(|s| s.is_object()) {
                    let item_schema = Arc::new(item_schema.clone());
                    for item in items {
                        item.attach_schema(Arc::clone(&item_schema));
                    }
                }
            }
            _ => {}
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int as i64,
    u32 => Int as i64,
    f64 => Float,
    f32 => Float as f64,
    String => Str,
    NdArray => Array,
    Node => Node,
    Vec<Value> => List,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Reject keys with the reserved prefix
pub fn check_key(key: &str) -> Result<()> {
    if key.starts_with(RESERVED_PREFIX) {
        return Err(DataModelError::ReservedKey(key.to_string()));
    }
    Ok(())
}

/// A dictionary-backed, optionally tagged document node
#[derive(Debug, Clone, Default)]
pub struct Node {
    tag: Option<String>,
    fields: BTreeMap<String, Value>,
    schema: Option<Arc<JsonValue>>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.fields == other.fields
    }
}

impl Node {
    /// An untagged node with no schema
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }

    /// Schema fragment bound to this node, if any
    pub fn schema(&self) -> Option<&JsonValue> {
        self.schema.as_deref()
    }

    /// Bind a schema to this node and the matching fragments to its children
    pub fn attach_schema(&mut self, schema: Arc<JsonValue>) {
        for (key, value) in self.fields.iter_mut() {
            if let Some(fragment) = property_fragment(&schema, key) {
                value.attach_schema(Arc::new(fragment));
            }
        }
        self.schema = Some(schema);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.fields.values_mut()
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.fields
            .get(key)
            .ok_or_else(|| DataModelError::AttributeMissing(key.to_string()))
    }

    /// Direct mutable access; bypasses assignment-time validation
    pub fn get_mut(&mut self, key: &str) -> Result<&mut Value> {
        self.fields
            .get_mut(key)
            .ok_or_else(|| DataModelError::AttributeMissing(key.to_string()))
    }

    /// Look up a dotted path such as `meta.instrument.optical_element`
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or(path);
        let mut current = self.get(first)?;
        let mut walked = first.to_string();
        for segment in segments {
            let node = current.as_node().ok_or_else(|| DataModelError::TypeMismatch {
                key: walked.clone(),
                expected: "node",
                found: current.type_name(),
            })?;
            current = node
                .get(segment)
                .map_err(|_| DataModelError::AttributeMissing(format!("{}.{}", walked, segment)))?;
            walked.push('.');
            walked.push_str(segment);
        }
        Ok(current)
    }

    pub fn node(&self, key: &str) -> Result<&Node> {
        let value = self.get(key)?;
        value.as_node().ok_or_else(|| mismatch(key, "node", value))
    }

    pub fn node_mut(&mut self, key: &str) -> Result<&mut Node> {
        let value = self.get_mut(key)?;
        let found = value.type_name();
        value.as_node_mut().ok_or_else(|| DataModelError::TypeMismatch {
            key: key.to_string(),
            expected: "node",
            found,
        })
    }

    pub fn array(&self, key: &str) -> Result<&NdArray> {
        let value = self.get(key)?;
        value.as_array().ok_or_else(|| mismatch(key, "ndarray", value))
    }

    pub fn str_value(&self, key: &str) -> Result<&str> {
        let value = self.get(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "str", value))
    }

    pub fn f64_value(&self, key: &str) -> Result<f64> {
        let value = self.get(key)?;
        value.as_f64().ok_or_else(|| mismatch(key, "float", value))
    }

    /// Assign `value` to `key`, validating it against the bound fragment first
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.set_with(key, value, &JsonSchemaValidator)
    }

    /// [`Node::set`] with an explicit validator
    pub fn set_with(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
        validator: &dyn Validator,
    ) -> Result<()> {
        let key = key.into();
        check_key(&key)?;
        let mut value = value.into();
        if let Some(fragment) = self.schema.as_ref().and_then(|s| property_fragment(s, &key)) {
            if config::validate_on_assignment() {
                validator.validate_fragment(&key, &value.to_json(), &fragment)?;
            }
            value.attach_schema(Arc::new(fragment));
        }
        self.fields.insert(key, value);
        Ok(())
    }

    /// Store `value` without assignment-time validation.
    ///
    /// Reserved keys are still rejected. Full validation still applies at
    /// `validate`/`save` time.
    pub fn insert_unchecked(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        check_key(&key)?;
        let mut value = value.into();
        if let Some(fragment) = self.schema.as_ref().and_then(|s| property_fragment(s, &key)) {
            value.attach_schema(Arc::new(fragment));
        }
        self.fields.insert(key, value);
        Ok(())
    }

    /// Insert without any key or schema checks; used when decoding files
    pub(crate) fn insert_raw(&mut self, key: String, value: Value) {
        self.fields.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// JSON projection seen by the schema engine; tags are dropped
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> DataModelError {
    DataModelError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Builds an untagged node without key or schema checks.
///
/// This is the in-memory construction path, so reserved `_` keys are not
/// rejected here. They are rejected by [`Node::set`], by
/// [`Node::insert_unchecked`] and when a file is decoded.
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Node {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Self::default()
        }
    }
}
