//! Model wrappers
//!
//! A [`DataModel`] wraps the root [`Node`] of one product and ties it to the
//! schema registered for its tag. Typed wrappers (one per product) and the
//! tag-dispatched [`AnyModel`] returned by [`open`] are generated below.
//!
//! Lifecycle per instance: a model starts `Unvalidated`, becomes `Validated`
//! after a successful [`DataModel::validate`], and drops back to
//! `Unvalidated` on any mutable access. [`DataModel::save`] always
//! validates first and writes nothing when validation fails.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config;
use crate::container;
use crate::error::{DataModelError, Result};
use crate::ndarray::NdArray;
use crate::node::{Node, Value};
use crate::registry::{bind_schema, registry, ModelKind, TagRegistry};
use crate::schema::{schema_store, SchemaStore};
use crate::validator::{JsonSchemaValidator, Validator};

/// Where a model stands with respect to full validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Unvalidated,
    Validated,
}

/// Schema-bound wrapper around a product's root node
#[derive(Debug, Clone)]
pub struct DataModel {
    kind: ModelKind,
    schema_uri: String,
    node: Node,
    state: Cell<ValidationState>,
    source: Option<PathBuf>,
}

impl DataModel {
    /// Wrap `node` as a model of `kind`.
    ///
    /// An untagged node is stamped with the kind's current tag. A tagged
    /// node must resolve to `kind` in the registry.
    pub fn from_node(kind: ModelKind, mut node: Node) -> Result<Self> {
        let registry = registry()?;
        match node.tag() {
            None => node.set_tag(kind.tag()),
            Some(tag) => {
                let found = registry.resolve(tag)?.kind;
                if found != kind {
                    return Err(DataModelError::TagMismatch {
                        tag: tag.to_string(),
                        expected: kind.model_name().to_string(),
                    });
                }
            }
        }
        bind_schema(&mut node)?;
        let tag = node.tag().unwrap_or_default().to_string();
        let schema_uri = registry.schema_uri_for(&tag, schema_store()?)?;
        Ok(Self {
            kind,
            schema_uri,
            node,
            state: Cell::new(ValidationState::Unvalidated),
            source: None,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn tag(&self) -> &str {
        self.node.tag().unwrap_or_default()
    }

    pub fn schema_uri(&self) -> &str {
        &self.schema_uri
    }

    pub fn state(&self) -> ValidationState {
        self.state.get()
    }

    /// File this model was opened from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Mutable access to the tree; the model becomes unvalidated
    pub fn node_mut(&mut self) -> &mut Node {
        self.state.set(ValidationState::Unvalidated);
        &mut self.node
    }

    pub fn into_node(self) -> Node {
        self.node
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.node.get(key)
    }

    pub fn get_path(&self, path: &str) -> Result<&Value> {
        self.node.get_path(path)
    }

    /// Assign a top-level key with assignment-time validation
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.node_mut().set(key, value)
    }

    pub fn meta(&self) -> Result<&Node> {
        self.node.node("meta")
    }

    pub fn meta_mut(&mut self) -> Result<&mut Node> {
        self.node_mut().node_mut("meta")
    }

    pub fn data(&self) -> Result<&NdArray> {
        self.node.array("data")
    }

    pub fn dq(&self) -> Result<&NdArray> {
        self.node.array("dq")
    }

    pub fn err(&self) -> Result<&NdArray> {
        self.node.array("err")
    }

    /// JSON projection of the whole tree as seen by the schema engine
    pub fn to_json(&self) -> JsonValue {
        self.node.to_json()
    }

    /// Full validation against the resolved schema for this model's tag
    pub fn validate(&self) -> Result<()> {
        self.validate_with(&JsonSchemaValidator)
    }

    /// [`DataModel::validate`] with an explicit validator
    pub fn validate_with(&self, validator: &dyn Validator) -> Result<()> {
        let store = schema_store()?;
        let schema = store.resolve(&self.schema_uri)?;
        validator.validate_whole(&self.node.to_json(), &schema, &self.schema_uri)?;
        validate_nested(&self.node, "", registry()?, store, validator)?;
        self.state.set(ValidationState::Validated);
        debug!(kind = %self.kind, "validated");
        Ok(())
    }

    /// Validate, then write the model to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Err(e) = self.validate() {
            warn!(path = %path.display(), kind = %self.kind, "refusing to save invalid model");
            return Err(e);
        }
        container::write_file(path, &self.node)?;
        info!(path = %path.display(), kind = %self.kind, "saved model");
        Ok(())
    }
}

/// Validate registered tagged nodes below the root against their own schemas
fn validate_nested(
    node: &Node,
    prefix: &str,
    registry: &TagRegistry,
    store: &SchemaStore,
    validator: &dyn Validator,
) -> Result<()> {
    for (key, value) in node.iter() {
        let Value::Node(child) = value else {
            continue;
        };
        let path = format!("{}/{}", prefix, key);
        if let Some(tag) = child.tag() {
            match registry.schema_uri_for(tag, store) {
                Ok(uri) => {
                    let schema = store.resolve(&uri)?;
                    validator
                        .validate_whole(&child.to_json(), &schema, &uri)
                        .map_err(|e| prefix_error(e, &path))?;
                }
                Err(_) => debug!(%path, %tag, "nested tag not registered, not validated on its own"),
            }
        }
        validate_nested(child, &path, registry, store, validator)?;
    }
    Ok(())
}

fn prefix_error(err: DataModelError, prefix: &str) -> DataModelError {
    match err {
        DataModelError::Validation {
            path,
            schema,
            violations,
        } => DataModelError::Validation {
            path: format!("{}{}", prefix, path),
            schema,
            violations: violations.prefixed(prefix),
        },
        other => other,
    }
}

/// Options for [`open_with`]
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Run full validation after decoding
    pub validate_on_read: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            validate_on_read: config::validate_on_read(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_on_read(mut self, enabled: bool) -> Self {
        self.validate_on_read = enabled;
        self
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<AnyModel> {
        open_with(path, self)
    }
}

/// Open a model file, dispatching on its tag, with the process-wide options
pub fn open(path: impl AsRef<Path>) -> Result<AnyModel> {
    open_with(path, &OpenOptions::default())
}

/// Open a model file with explicit options
pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<AnyModel> {
    let path = path.as_ref();
    let node = container::read_file(path)?;
    let tag = node
        .tag()
        .ok_or_else(|| DataModelError::UnknownTag("<untagged>".to_string()))?
        .to_string();
    let kind = registry()?.resolve(&tag)?.kind;
    let mut model = DataModel::from_node(kind, node)?;
    model.source = Some(path.to_path_buf());
    if options.validate_on_read {
        model.validate()?;
    } else {
        warn!(path = %path.display(), "validation on read disabled");
    }
    info!(path = %path.display(), %tag, %kind, "opened model");
    Ok(AnyModel::from_data_model(model))
}

macro_rules! define_models {
    ($($(#[$doc:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone)]
            pub struct $name(DataModel);

            impl $name {
                pub const KIND: ModelKind = ModelKind::$kind;

                /// Wrap an in-memory node of this product type
                pub fn new(node: Node) -> Result<Self> {
                    DataModel::from_node(ModelKind::$kind, node).map(Self)
                }

                /// Open a file that must contain this product type
                pub fn open(path: impl AsRef<Path>) -> Result<Self> {
                    open(path)?.try_into()
                }

                pub fn into_inner(self) -> DataModel {
                    self.0
                }
            }

            impl Deref for $name {
                type Target = DataModel;

                fn deref(&self) -> &DataModel {
                    &self.0
                }
            }

            impl DerefMut for $name {
                fn deref_mut(&mut self) -> &mut DataModel {
                    &mut self.0
                }
            }

            impl TryFrom<AnyModel> for $name {
                type Error = DataModelError;

                fn try_from(model: AnyModel) -> Result<Self> {
                    match model {
                        AnyModel::$kind(m) => Ok(m),
                        other => Err(DataModelError::TagMismatch {
                            tag: other.tag().to_string(),
                            expected: stringify!($name).to_string(),
                        }),
                    }
                }
            }

            impl From<$name> for AnyModel {
                fn from(model: $name) -> Self {
                    AnyModel::$kind(model)
                }
            }
        )*

        /// A model of whichever product type a file's tag names
        #[derive(Debug, Clone)]
        pub enum AnyModel {
            $($kind($name),)*
        }

        impl AnyModel {
            fn from_data_model(model: DataModel) -> Self {
                match model.kind() {
                    $(ModelKind::$kind => AnyModel::$kind($name(model)),)*
                }
            }

            pub fn as_data_model(&self) -> &DataModel {
                match self {
                    $(AnyModel::$kind(m) => &m.0,)*
                }
            }

            pub fn as_data_model_mut(&mut self) -> &mut DataModel {
                match self {
                    $(AnyModel::$kind(m) => &mut m.0,)*
                }
            }

            pub fn into_data_model(self) -> DataModel {
                match self {
                    $(AnyModel::$kind(m) => m.0,)*
                }
            }
        }
    };
}

define_models! {
    /// Level 2 calibrated WFI image
    ImageModel => WfiImage,
    /// Dark current reference file
    DarkRefModel => DarkRef,
    /// Flat field reference file
    FlatRefModel => FlatRef,
    /// Gain reference file
    GainRefModel => GainRef,
    /// Classic linearity coefficients reference file
    LinearityRefModel => LinearityRef,
    /// Bad pixel mask reference file
    MaskRefModel => MaskRef,
    /// Pixel area reference file
    PixelareaRefModel => PixelareaRef,
    /// Read noise reference file
    ReadnoiseRefModel => ReadnoiseRef,
    /// Saturation reference file
    SaturationRefModel => SaturationRef,
    /// Super bias reference file
    SuperbiasRefModel => SuperbiasRef,
    /// WFI imaging photometry reference file
    WfiImgPhotomRefModel => WfiImgPhotomRef,
}

impl Deref for AnyModel {
    type Target = DataModel;

    fn deref(&self) -> &DataModel {
        self.as_data_model()
    }
}

impl DerefMut for AnyModel {
    fn deref_mut(&mut self) -> &mut DataModel {
        self.as_data_model_mut()
    }
}
