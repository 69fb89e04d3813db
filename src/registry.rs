//! Tag Registry
//!
//! Maps tag patterns found in serialized trees to the model kind that wraps
//! them and the schema that describes them. The process-wide registry is
//! built once and is read-only afterwards.

use std::fmt;
use std::sync::{Arc, OnceLock};

use semver::Version;
use tracing::{debug, info};

use crate::error::{DataModelError, Result};
use crate::node::{Node, Value};
use crate::schema::{schema_store, SchemaStore};
use crate::tag::{TagPattern, TagUri};

/// Every product type with its own model wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    WfiImage,
    DarkRef,
    FlatRef,
    GainRef,
    LinearityRef,
    MaskRef,
    PixelareaRef,
    ReadnoiseRef,
    SaturationRef,
    SuperbiasRef,
    WfiImgPhotomRef,
}

impl ModelKind {
    pub fn all() -> &'static [ModelKind] {
        &[
            ModelKind::WfiImage,
            ModelKind::DarkRef,
            ModelKind::FlatRef,
            ModelKind::GainRef,
            ModelKind::LinearityRef,
            ModelKind::MaskRef,
            ModelKind::PixelareaRef,
            ModelKind::ReadnoiseRef,
            ModelKind::SaturationRef,
            ModelKind::SuperbiasRef,
            ModelKind::WfiImgPhotomRef,
        ]
    }

    /// Tag path below the tag prefix, without version
    pub fn tag_path(&self) -> &'static str {
        match self {
            ModelKind::WfiImage => "wfi_image",
            ModelKind::DarkRef => "reference_files/dark",
            ModelKind::FlatRef => "reference_files/flat",
            ModelKind::GainRef => "reference_files/gain",
            ModelKind::LinearityRef => "reference_files/linearity",
            ModelKind::MaskRef => "reference_files/mask",
            ModelKind::PixelareaRef => "reference_files/pixelarea",
            ModelKind::ReadnoiseRef => "reference_files/readnoise",
            ModelKind::SaturationRef => "reference_files/saturation",
            ModelKind::SuperbiasRef => "reference_files/superbias",
            ModelKind::WfiImgPhotomRef => "reference_files/wfi_img_photom",
        }
    }

    /// Name of the wrapper type, also written to `meta.model_type`
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelKind::WfiImage => "ImageModel",
            ModelKind::DarkRef => "DarkRefModel",
            ModelKind::FlatRef => "FlatRefModel",
            ModelKind::GainRef => "GainRefModel",
            ModelKind::LinearityRef => "LinearityRefModel",
            ModelKind::MaskRef => "MaskRefModel",
            ModelKind::PixelareaRef => "PixelareaRefModel",
            ModelKind::ReadnoiseRef => "ReadnoiseRefModel",
            ModelKind::SaturationRef => "SaturationRefModel",
            ModelKind::SuperbiasRef => "SuperbiasRefModel",
            ModelKind::WfiImgPhotomRef => "WfiImgPhotomRefModel",
        }
    }

    /// Reference file category code, `None` for science products
    pub fn reftype(&self) -> Option<&'static str> {
        match self {
            ModelKind::WfiImage => None,
            ModelKind::DarkRef => Some("DARK"),
            ModelKind::FlatRef => Some("FLAT"),
            ModelKind::GainRef => Some("GAIN"),
            ModelKind::LinearityRef => Some("LINEARITY"),
            ModelKind::MaskRef => Some("MASK"),
            ModelKind::PixelareaRef => Some("AREA"),
            ModelKind::ReadnoiseRef => Some("READNOISE"),
            ModelKind::SaturationRef => Some("SATURATION"),
            ModelKind::SuperbiasRef => Some("BIAS"),
            ModelKind::WfiImgPhotomRef => Some("PHOTOM"),
        }
    }

    pub fn is_reference_file(&self) -> bool {
        self.reftype().is_some()
    }

    /// Current tag written for new documents of this kind
    pub fn tag_uri(&self) -> TagUri {
        TagUri::new(self.tag_path(), Version::new(1, 0, 0))
    }

    pub fn tag(&self) -> String {
        self.tag_uri().to_string()
    }

    pub fn schema_uri(&self) -> String {
        self.tag_uri().schema_uri()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

/// One registered (pattern, schema, kind) triple
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub pattern: TagPattern,
    pub schema_uri: String,
    pub kind: ModelKind,
}

/// Immutable tag -> (schema, kind) lookup
#[derive(Debug, Clone)]
pub struct TagRegistry {
    entries: Vec<RegistryEntry>,
}

/// Collects registrations before the registry is frozen
#[derive(Debug, Default)]
pub struct TagRegistryBuilder {
    entries: Vec<RegistryEntry>,
}

impl TagRegistryBuilder {
    /// Fails with `DuplicateTag` if the pattern is already present
    pub fn register(
        mut self,
        tag_pattern: &str,
        schema_uri: impl Into<String>,
        kind: ModelKind,
    ) -> Result<Self> {
        if self.entries.iter().any(|e| e.pattern.as_str() == tag_pattern) {
            return Err(DataModelError::DuplicateTag(tag_pattern.to_string()));
        }
        self.entries.push(RegistryEntry {
            pattern: TagPattern::new(tag_pattern)?,
            schema_uri: schema_uri.into(),
            kind,
        });
        Ok(self)
    }

    /// Freeze the registry, checking every schema is present in `store`
    pub fn build(self, store: &SchemaStore) -> Result<TagRegistry> {
        for entry in &self.entries {
            store.load_schema(&entry.schema_uri)?;
        }
        Ok(TagRegistry {
            entries: self.entries,
        })
    }
}

impl TagRegistry {
    pub fn builder() -> TagRegistryBuilder {
        TagRegistryBuilder::default()
    }

    /// Registry with every product in [`ModelKind::all`]
    pub fn with_defaults(store: &SchemaStore) -> Result<Self> {
        let mut builder = Self::builder();
        for kind in ModelKind::all() {
            builder = builder.register(&kind.tag_uri().any_version_pattern(), kind.schema_uri(), *kind)?;
        }
        builder.build(store)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Entry for an exact or pattern-matched tag.
    ///
    /// Exact patterns win over wildcard ones; otherwise the first
    /// registration matching the tag is used.
    pub fn resolve(&self, tag: &str) -> Result<&RegistryEntry> {
        self.entries
            .iter()
            .find(|e| e.pattern.is_exact() && e.pattern.matches(tag))
            .or_else(|| self.entries.iter().find(|e| e.pattern.matches(tag)))
            .ok_or_else(|| DataModelError::UnknownTag(tag.to_string()))
    }

    pub fn entry_for_kind(&self, kind: ModelKind) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Schema for `tag`, with the versioned schema preferred when present
    pub fn schema_uri_for(&self, tag: &str, store: &SchemaStore) -> Result<String> {
        let entry = self.resolve(tag)?;
        if let Ok(parsed) = TagUri::parse(tag) {
            let versioned = parsed.schema_uri();
            if store.contains(&versioned) {
                return Ok(versioned);
            }
        }
        Ok(entry.schema_uri.clone())
    }
}

static REGISTRY: OnceLock<TagRegistry> = OnceLock::new();

/// Install a custom registry. Fails if the process-wide registry already exists.
pub fn init_registry(registry: TagRegistry) -> std::result::Result<(), TagRegistry> {
    REGISTRY.set(registry)
}

/// Process-wide registry, built with the defaults on first use
pub fn registry() -> Result<&'static TagRegistry> {
    if let Some(registry) = REGISTRY.get() {
        return Ok(registry);
    }
    let built = TagRegistry::with_defaults(schema_store()?)?;
    info!(entries = built.entries().len(), "initialized tag registry");
    Ok(REGISTRY.get_or_init(|| built))
}

/// Bind the registered schema for `node`'s tag, and for any registered
/// tagged node nested inside it, so assignment-time validation applies.
pub fn bind_schema(node: &mut Node) -> Result<ModelKind> {
    let tag = node
        .tag()
        .ok_or_else(|| DataModelError::UnknownTag("<untagged>".to_string()))?
        .to_string();
    let registry = registry()?;
    let store = schema_store()?;
    let kind = registry.resolve(&tag)?.kind;
    let schema = store.resolve(&registry.schema_uri_for(&tag, store)?)?;
    node.attach_schema(schema);
    bind_nested(node, registry, store)?;
    debug!(%tag, %kind, "bound schema");
    Ok(kind)
}

fn bind_nested(node: &mut Node, registry: &TagRegistry, store: &SchemaStore) -> Result<()> {
    for value in node.values_mut() {
        match value {
            Value::Node(child) => {
                if let Some(tag) = child.tag().map(str::to_string) {
                    match registry.schema_uri_for(&tag, store) {
                        Ok(uri) => {
                            let schema: Arc<_> = store.resolve(&uri)?;
                            child.attach_schema(schema);
                        }
                        Err(_) => debug!(%tag, "nested tag not registered, no schema bound"),
                    }
                }
                bind_nested(child, registry, store)?;
            }
            Value::List(items) => {
                for item in items.iter_mut() {
                    if let Value::Node(child) = item {
                        bind_nested(child, registry, store)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SchemaStore {
        SchemaStore::embedded().unwrap()
    }

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = TagRegistry::with_defaults(&store()).unwrap();
        assert_eq!(registry.entries().len(), ModelKind::all().len());
        for kind in ModelKind::all() {
            assert_eq!(registry.resolve(&kind.tag()).unwrap().kind, *kind);
        }
    }

    #[test]
    fn test_pattern_resolves_other_versions() {
        let registry = TagRegistry::with_defaults(&store()).unwrap();
        let entry = registry
            .resolve("asdf://stsci.edu/datamodels/roman/tags/reference_files/flat-1.3.0")
            .unwrap();
        assert_eq!(entry.kind, ModelKind::FlatRef);
        assert_eq!(
            entry.schema_uri,
            "asdf://stsci.edu/datamodels/roman/schemas/reference_files/flat-1.0.0"
        );
    }

    #[test]
    fn test_unknown_tag() {
        let registry = TagRegistry::with_defaults(&store()).unwrap();
        let err = registry
            .resolve("asdf://stsci.edu/datamodels/roman/tags/reference_files/ipc-1.0.0")
            .unwrap_err();
        assert!(matches!(err, DataModelError::UnknownTag(_)));
    }

    #[test]
    fn test_duplicate_pattern() {
        let kind = ModelKind::FlatRef;
        let err = TagRegistry::builder()
            .register(&kind.tag(), kind.schema_uri(), kind)
            .unwrap()
            .register(&kind.tag(), kind.schema_uri(), kind)
            .unwrap_err();
        assert!(matches!(err, DataModelError::DuplicateTag(_)));
    }

    #[test]
    fn test_build_requires_schema() {
        let err = TagRegistry::builder()
            .register("asdf://example/tags/none-*", "asdf://example/schemas/none-1.0.0", ModelKind::GainRef)
            .unwrap()
            .build(&store())
            .unwrap_err();
        assert!(matches!(err, DataModelError::SchemaLoad { .. }));
    }

    #[test]
    fn test_exact_pattern_wins() {
        let flat = ModelKind::FlatRef;
        let registry = TagRegistry::builder()
            .register(&flat.tag_uri().any_version_pattern(), flat.schema_uri(), flat)
            .unwrap()
            .register(&flat.tag(), ModelKind::DarkRef.schema_uri(), ModelKind::DarkRef)
            .unwrap()
            .build(&store())
            .unwrap();
        assert_eq!(registry.resolve(&flat.tag()).unwrap().kind, ModelKind::DarkRef);
    }

    #[test]
    fn test_kind_metadata() {
        assert_eq!(ModelKind::SuperbiasRef.reftype(), Some("BIAS"));
        assert_eq!(ModelKind::PixelareaRef.reftype(), Some("AREA"));
        assert!(!ModelKind::WfiImage.is_reference_file());
        assert_eq!(
            ModelKind::WfiImage.tag(),
            "asdf://stsci.edu/datamodels/roman/tags/wfi_image-1.0.0"
        );
    }

    #[test]
    fn test_bind_schema_untagged() {
        let mut node = Node::new();
        assert!(matches!(bind_schema(&mut node), Err(DataModelError::UnknownTag(_))));
    }

    #[test]
    fn test_bind_schema_skips_unregistered_nested_tag() {
        let mut node = Node::tagged(ModelKind::GainRef.tag());
        let mut extra = Node::tagged("asdf://example.org/tags/unregistered-1.0.0");
        extra.insert_unchecked("anything", "goes").unwrap();
        node.insert_unchecked("extra", extra).unwrap();
        assert_eq!(bind_schema(&mut node).unwrap(), ModelKind::GainRef);
        assert!(node.schema().is_some());
        assert!(node.node("extra").unwrap().schema().is_none());
    }
}
