//! Schema validation capability
//!
//! Two checks are offered: a fragment check scoped to one key (run on
//! assignment) and a whole-tree check (run by `validate`, `save` and
//! `open`). Only the whole-tree check is authoritative.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use jsonschema::{Draft, JSONSchema};
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::error::{DataModelError, Result};

/// A single nonconformance found by the schema engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON Pointer to the offending value in the instance.
    pub instance_path: String,
    /// JSON Pointer to the schema keyword that failed.
    pub schema_path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance_path.is_empty() {
            write!(f, "  (root): {}", self.message)
        } else {
            write!(f, "  {}: {}", self.instance_path, self.message)
        }
    }
}

/// Every violation reported for one validation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Violation> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// Prefix every instance path, used when a subtree was checked on its own.
    pub fn prefixed(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|v| Violation {
                    instance_path: format!("{}{}", prefix, v.instance_path),
                    ..v
                })
                .collect(),
        )
    }
}

impl From<Vec<Violation>> for Violations {
    fn from(v: Vec<Violation>) -> Self {
        Self(v)
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Validation capability injected into nodes and models.
pub trait Validator {
    /// Check `value` against the fragment governing `key`.
    fn validate_fragment(&self, key: &str, value: &JsonValue, schema: &JsonValue) -> Result<()>;

    /// Check a whole projected tree against a resolved schema.
    fn validate_whole(&self, tree: &JsonValue, schema: &JsonValue, schema_name: &str)
        -> Result<()>;
}

/// [`Validator`] backed by the `jsonschema` crate (Draft 7).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

/// Compiled schemas keyed by their canonical JSON text
static COMPILED: OnceLock<RwLock<HashMap<String, Arc<JSONSchema>>>> = OnceLock::new();

impl JsonSchemaValidator {
    /// Compile `schema`, reusing an earlier compilation of identical text
    fn compile(schema: &JsonValue, schema_name: &str) -> Result<Arc<JSONSchema>> {
        let cache = COMPILED.get_or_init(Default::default);
        let key = schema.to_string();
        if let Some(hit) = cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| DataModelError::SchemaLoad {
                uri: schema_name.to_string(),
                reason: e.to_string(),
            })?;
        let compiled = Arc::new(compiled);
        trace!(schema = schema_name, "compiled schema");
        if let Ok(mut c) = cache.write() {
            c.insert(key, Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    /// Collect every violation of `instance` against `schema`.
    pub fn violations(schema: &JsonValue, instance: &JsonValue, schema_name: &str)
        -> Result<Violations> {
        let compiled = Self::compile(schema, schema_name)?;
        let found: Vec<Violation> = match compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| Violation {
                    instance_path: e.instance_path.to_string(),
                    schema_path: e.schema_path.to_string(),
                    message: e.to_string(),
                })
                .collect(),
        };
        Ok(Violations(found))
    }
}

fn into_result(violations: Violations, schema_name: &str, prefix: &str) -> Result<()> {
    if violations.is_empty() {
        return Ok(());
    }
    let violations = violations.prefixed(prefix);
    let path = violations
        .first()
        .map(|v| v.instance_path.clone())
        .unwrap_or_default();
    Err(DataModelError::Validation {
        path,
        schema: schema_name.to_string(),
        violations,
    })
}

impl Validator for JsonSchemaValidator {
    fn validate_fragment(&self, key: &str, value: &JsonValue, schema: &JsonValue) -> Result<()> {
        trace!(key, "validating fragment");
        let name = format!("fragment for '{}'", key);
        let violations = Self::violations(schema, value, &name)?;
        into_result(violations, &name, &format!("/{}", key))
    }

    fn validate_whole(&self, tree: &JsonValue, schema: &JsonValue, schema_name: &str)
        -> Result<()> {
        let violations = Self::violations(schema, tree, schema_name)?;
        into_result(violations, schema_name, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn telescope_schema() -> JsonValue {
        json!({
            "type": "object",
            "properties": { "telescope": { "enum": ["ROMAN"] } },
            "required": ["telescope"]
        })
    }

    #[test]
    fn test_whole_accepts_valid() {
        let v = JsonSchemaValidator;
        assert!(v
            .validate_whole(&json!({"telescope": "ROMAN"}), &telescope_schema(), "t")
            .is_ok());
    }

    #[test]
    fn test_whole_reports_path() {
        let v = JsonSchemaValidator;
        let err = v
            .validate_whole(&json!({"telescope": "XOMAN"}), &telescope_schema(), "t")
            .unwrap_err();
        match err {
            DataModelError::Validation { path, violations, .. } => {
                assert_eq!(path, "/telescope");
                assert_eq!(violations.len(), 1);
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_whole_reports_all_violations() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer" },
                "b": { "type": "string" }
            }
        });
        let err = JsonSchemaValidator::violations(&schema, &json!({"a": "x", "b": 1}), "s")
            .unwrap();
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn test_fragment_prefixes_key() {
        let v = JsonSchemaValidator;
        let err = v
            .validate_fragment("telescope", &json!("NOTROMAN"), &json!({"enum": ["ROMAN"]}))
            .unwrap_err();
        match err {
            DataModelError::Validation { path, .. } => assert_eq!(path, "/telescope"),
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_schema_is_load_error() {
        let err = JsonSchemaValidator::violations(&json!({"type": 12}), &json!(1), "broken")
            .unwrap_err();
        assert!(matches!(err, DataModelError::SchemaLoad { .. }));
    }

    #[test]
    fn test_compiled_schema_is_reused() {
        let schema = json!({"type": "object", "properties": {"reused": {"const": 1}}});
        let first = JsonSchemaValidator::compile(&schema, "a").unwrap();
        let second = JsonSchemaValidator::compile(&schema.clone(), "b").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let other = JsonSchemaValidator::compile(&json!({"const": 2}), "c").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
