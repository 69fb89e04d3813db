//! Error types for the data models

use thiserror::Error;

use crate::validator::Violations;

/// Result type for data model operations
pub type Result<T> = std::result::Result<T, DataModelError>;

/// Data model errors
#[derive(Error, Debug)]
pub enum DataModelError {
    #[error("Validation failed at '{path}' against {schema}:\n{violations}")]
    Validation {
        /// Instance path of the first nonconforming value
        path: String,
        /// Schema (or fragment) that rejected the value
        schema: String,
        violations: Violations,
    },

    #[error("Reserved key: '{0}' (keys starting with '_' cannot be assigned)")]
    ReservedKey(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Attribute missing: {0}")]
    AttributeMissing(String),

    #[error("Type mismatch at '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Tag pattern already registered: {0}")]
    DuplicateTag(String),

    #[error("Tag {tag} does not belong to {expected}")]
    TagMismatch { tag: String, expected: String },

    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("Schema load error for '{uri}': {reason}")]
    SchemaLoad { uri: String, reason: String },

    #[error("Invalid container format: {0}")]
    Format(String),

    #[error("Checksum mismatch in block {block}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        block: usize,
        expected: String,
        actual: String,
    },

    #[error("Shape {shape:?} needs {expected} elements, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl DataModelError {
    /// True for schema nonconformance, whether partial or full
    pub fn is_validation(&self) -> bool {
        matches!(self, DataModelError::Validation { .. })
    }
}
