//! Tag URIs and tag patterns
//!
//! A tag names a document type and version, e.g.
//! `asdf://stsci.edu/datamodels/roman/tags/reference_files/flat-1.0.0`.
//! The matching schema lives at the same path under `schemas/`.

use regex::Regex;
use semver::Version;
use std::fmt;

use crate::error::{DataModelError, Result};

/// Prefix shared by every Roman data model tag
pub const TAG_PREFIX: &str = "asdf://stsci.edu/datamodels/roman/tags/";

/// Prefix shared by every Roman data model schema
pub const SCHEMA_PREFIX: &str = "asdf://stsci.edu/datamodels/roman/schemas/";

/// Tag carried by typed array leaves
pub const NDARRAY_TAG: &str = "tag:stsci.edu:asdf/core/ndarray-1.0.0";

/// A parsed, versioned tag URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagUri {
    /// Path below [`TAG_PREFIX`] without the version, e.g. `reference_files/flat`
    pub path: String,
    /// Semantic version of the document type
    pub version: Version,
}

impl TagUri {
    /// Parse a full tag string
    pub fn parse(tag: &str) -> Result<Self> {
        let rest = tag
            .strip_prefix(TAG_PREFIX)
            .ok_or_else(|| DataModelError::InvalidTag(tag.to_string()))?;
        let (path, version) = rest
            .rsplit_once('-')
            .ok_or_else(|| DataModelError::InvalidTag(tag.to_string()))?;
        if path.is_empty() {
            return Err(DataModelError::InvalidTag(tag.to_string()));
        }
        Ok(Self {
            path: path.to_string(),
            version: Version::parse(version)?,
        })
    }

    pub fn new(path: impl Into<String>, version: Version) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }

    /// Short document name, e.g. `flat`
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// URI of the schema describing this tag
    pub fn schema_uri(&self) -> String {
        format!("{}{}-{}", SCHEMA_PREFIX, self.path, self.version)
    }

    /// Pattern matching every version of this tag
    pub fn any_version_pattern(&self) -> String {
        format!("{}{}-*", TAG_PREFIX, self.path)
    }

    pub fn is_reference_file(&self) -> bool {
        self.path.starts_with("reference_files/")
    }
}

impl fmt::Display for TagUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", TAG_PREFIX, self.path, self.version)
    }
}

/// A tag pattern where `*` matches any run of characters
#[derive(Debug, Clone)]
pub struct TagPattern {
    raw: String,
    regex: Regex,
}

impl TagPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let raw = pattern.into();
        let body = regex::escape(&raw).replace(r"\*", ".*");
        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| DataModelError::InvalidTag(format!("{}: {}", raw, e)))?;
        Ok(Self { raw, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_exact(&self) -> bool {
        !self.raw.contains('*')
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.regex.is_match(tag)
    }
}

impl PartialEq for TagPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for TagPattern {}
