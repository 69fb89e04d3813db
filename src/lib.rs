//! Roman Data Models
//!
//! Schema-validated data models for Roman WFI level 2 images and the
//! calibration reference files that produce them.
//!
//! ## Features
//!
//! - **Tagged Trees**: Every product is a tree of tagged nodes bound to a schema
//! - **Assignment Checks**: Values are checked against their schema fragment when set
//! - **Full Validation**: Whole-tree validation on read, on save, or on demand
//! - **Tag Dispatch**: `open` picks the model type from the file's root tag
//! - **Checksummed Blocks**: Array data lives in SHA-256 checked binary blocks
//!
//! ## File Layout
//!
//! ```text
//! #ASDF 1.0.0
//! #ASDF_STANDARD 1.5.0
//! --- YAML tree, root under `roman:`
//! ...
//! \xd3BLK <header> <array bytes>   (one block per array)
//! ```

pub mod checksum;
pub mod config;
pub mod container;
pub mod datamodels;
pub mod error;
pub mod ndarray;
pub mod node;
pub mod registry;
pub mod schema;
pub mod tag;
pub mod testing;
pub mod validator;

pub use checksum::BlockChecksum;
pub use config::DataModelConfig;
pub use datamodels::{
    open, open_with, AnyModel, DarkRefModel, DataModel, FlatRefModel, GainRefModel, ImageModel,
    LinearityRefModel, MaskRefModel, OpenOptions, PixelareaRefModel, ReadnoiseRefModel,
    SaturationRefModel, SuperbiasRefModel, ValidationState, WfiImgPhotomRefModel,
};
pub use error::{DataModelError, Result};
pub use ndarray::{DataType, NdArray};
pub use node::{Node, Value};
pub use registry::{ModelKind, TagRegistry};
pub use schema::SchemaStore;
pub use tag::TagUri;
pub use validator::{JsonSchemaValidator, Validator, Violation, Violations};
