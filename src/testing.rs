//! Factories for small, schema-valid products
//!
//! Each `mk_*` function builds the tagged root node of one product with
//! every required attribute filled in. Nodes come back unbound; wrapping
//! one in its model binds the schema. The `mk_*_file` variants wrap the
//! node and save it to disk.

use std::path::Path;

use chrono::Utc;

use crate::datamodels::{
    AnyModel, DarkRefModel, FlatRefModel, GainRefModel, ImageModel, LinearityRefModel, MaskRefModel,
    PixelareaRefModel, ReadnoiseRefModel, SaturationRefModel, SuperbiasRefModel,
    WfiImgPhotomRefModel,
};
use crate::error::Result;
use crate::ndarray::{DataType, NdArray};
use crate::node::{Node, Value};
use crate::registry::ModelKind;

/// Side length used by the `mk_*_file` variants
const FILE_SIDE: usize = 20;

/// Number of planes used by the 3-D `mk_*_file` variants
const FILE_PLANES: usize = 2;

fn now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

fn instrument() -> Node {
    Node::from_iter([
        ("name", Value::from("WFI")),
        ("detector", Value::from("WFI01")),
        ("optical_element", Value::from("F158")),
    ])
}

/// float32 array filled with a ramp so round trips compare real values
fn ramp(shape: Vec<usize>) -> NdArray {
    let mut array = NdArray::zeros(DataType::Float32, shape);
    if let Some(values) = array.as_f32_mut() {
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as f32 * 0.5;
        }
    }
    array
}

fn dq(shape: Vec<usize>) -> NdArray {
    NdArray::zeros(DataType::Uint32, shape)
}

/// Science metadata shared by every level 2 product
pub fn mk_common_meta() -> Node {
    let exposure = Node::from_iter([
        ("type", Value::from("WFI_IMAGE")),
        ("start_time", Value::from(now())),
        ("ngroups", Value::from(6)),
        ("nframes", Value::from(8)),
        ("exposure_time", Value::from(139.2)),
    ]);
    Node::from_iter([
        ("date", Value::from(now())),
        ("filename", Value::from("test_image.asdf")),
        ("model_type", Value::from(ModelKind::WfiImage.model_name())),
        ("origin", Value::from("STSCI")),
        ("telescope", Value::from("ROMAN")),
        ("instrument", Value::from(instrument())),
        ("exposure", Value::from(exposure)),
    ])
}

/// Metadata shared by every reference file, with `reftype` set for `kind`
pub fn mk_ref_common(kind: ModelKind) -> Node {
    Node::from_iter([
        ("reftype", Value::from(kind.reftype().unwrap_or("N/A"))),
        ("pedigree", Value::from("GROUND")),
        ("description", Value::from("For testing")),
        ("author", Value::from("test system")),
        ("useafter", Value::from("2020-01-01T00:00:00.000")),
        ("telescope", Value::from("ROMAN")),
        ("origin", Value::from("STSCI")),
        ("instrument", Value::from(instrument())),
    ])
}

fn root(kind: ModelKind, meta: Node) -> Node {
    let mut node = Node::tagged(kind.tag());
    node.insert_raw("meta".to_string(), Value::from(meta));
    node
}

fn put(node: &mut Node, key: &str, array: NdArray) {
    node.insert_raw(key.to_string(), Value::from(array));
}

/// Level 2 calibrated image
pub fn mk_level2_image(shape: (usize, usize)) -> Node {
    let dims = vec![shape.0, shape.1];
    let mut node = root(ModelKind::WfiImage, mk_common_meta());
    put(&mut node, "data", ramp(dims.clone()));
    put(&mut node, "dq", dq(dims.clone()));
    put(&mut node, "err", ramp(dims.clone()));
    put(&mut node, "var_poisson", ramp(dims.clone()));
    put(&mut node, "var_rnoise", ramp(dims));
    node
}

/// Dark current reference; `shape` is (planes, rows, columns)
pub fn mk_dark(shape: (usize, usize, usize)) -> Node {
    let (planes, rows, cols) = shape;
    let mut node = root(ModelKind::DarkRef, mk_ref_common(ModelKind::DarkRef));
    put(&mut node, "data", ramp(vec![planes, rows, cols]));
    put(&mut node, "dq", dq(vec![rows, cols]));
    put(&mut node, "err", ramp(vec![planes, rows, cols]));
    node
}

pub fn mk_flat(shape: (usize, usize)) -> Node {
    let dims = vec![shape.0, shape.1];
    let mut node = root(ModelKind::FlatRef, mk_ref_common(ModelKind::FlatRef));
    put(&mut node, "data", ramp(dims.clone()));
    put(&mut node, "dq", dq(dims.clone()));
    put(&mut node, "err", ramp(dims));
    node
}

pub fn mk_gain(shape: (usize, usize)) -> Node {
    let mut node = root(ModelKind::GainRef, mk_ref_common(ModelKind::GainRef));
    put(&mut node, "data", ramp(vec![shape.0, shape.1]));
    node
}

/// Linearity coefficients; `shape` is (coefficients, rows, columns)
pub fn mk_linearity(shape: (usize, usize, usize)) -> Node {
    let (ncoeffs, rows, cols) = shape;
    let mut node = root(ModelKind::LinearityRef, mk_ref_common(ModelKind::LinearityRef));
    put(&mut node, "coeffs", ramp(vec![ncoeffs, rows, cols]));
    put(&mut node, "dq", dq(vec![rows, cols]));
    node
}

pub fn mk_mask(shape: (usize, usize)) -> Node {
    let mut node = root(ModelKind::MaskRef, mk_ref_common(ModelKind::MaskRef));
    put(&mut node, "dq", dq(vec![shape.0, shape.1]));
    node
}

pub fn mk_pixelarea(shape: (usize, usize)) -> Node {
    let mut meta = mk_ref_common(ModelKind::PixelareaRef);
    let photometry = Node::from_iter([
        ("pixelarea_steradians", Value::from(2.31e-14)),
        ("pixelarea_arcsecsq", Value::from(0.000_984_5)),
    ]);
    meta.insert_raw("photometry".to_string(), Value::from(photometry));
    let mut node = root(ModelKind::PixelareaRef, meta);
    put(&mut node, "data", ramp(vec![shape.0, shape.1]));
    node
}

pub fn mk_readnoise(shape: (usize, usize)) -> Node {
    let mut node = root(ModelKind::ReadnoiseRef, mk_ref_common(ModelKind::ReadnoiseRef));
    put(&mut node, "data", ramp(vec![shape.0, shape.1]));
    node
}

pub fn mk_saturation(shape: (usize, usize)) -> Node {
    let dims = vec![shape.0, shape.1];
    let mut node = root(ModelKind::SaturationRef, mk_ref_common(ModelKind::SaturationRef));
    put(&mut node, "data", ramp(dims.clone()));
    put(&mut node, "dq", dq(dims));
    node
}

pub fn mk_superbias(shape: (usize, usize)) -> Node {
    let dims = vec![shape.0, shape.1];
    let mut node = root(ModelKind::SuperbiasRef, mk_ref_common(ModelKind::SuperbiasRef));
    put(&mut node, "data", ramp(dims.clone()));
    put(&mut node, "dq", dq(dims.clone()));
    put(&mut node, "err", ramp(dims));
    node
}

/// Photometry table with one row per imaging element
pub fn mk_wfi_img_photom() -> Node {
    let row = |photmjsr: Option<f64>, uncertainty: Option<f64>, pixelareasr: Option<f64>| {
        Value::from(Node::from_iter([
            ("photmjsr", Value::from(photmjsr)),
            ("uncertainty", Value::from(uncertainty)),
            ("pixelareasr", Value::from(pixelareasr)),
        ]))
    };
    let table = Node::from_iter([
        ("F062", row(Some(3.45e-4), Some(1.2e-5), Some(2.84e-13))),
        ("F158", row(Some(5.61e-4), Some(2.1e-5), Some(2.84e-13))),
        ("W146", row(Some(1.52e-4), Some(8.7e-6), Some(2.84e-13))),
        ("GRISM", row(None, None, Some(2.84e-13))),
        ("DARK", row(None, None, None)),
    ]);
    let mut node = root(ModelKind::WfiImgPhotomRef, mk_ref_common(ModelKind::WfiImgPhotomRef));
    node.insert_raw("phot_table".to_string(), Value::from(table));
    node
}

macro_rules! file_factories {
    ($($(#[$doc:meta])* $fn_name:ident => $model:ident($node:expr)),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $fn_name(path: impl AsRef<Path>) -> Result<$model> {
                let model = $model::new($node)?;
                model.save(path)?;
                Ok(model)
            }
        )*
    };
}

file_factories! {
    mk_level2_image_file => ImageModel(mk_level2_image((FILE_SIDE, FILE_SIDE))),
    mk_dark_file => DarkRefModel(mk_dark((FILE_PLANES, FILE_SIDE, FILE_SIDE))),
    mk_flat_file => FlatRefModel(mk_flat((FILE_SIDE, FILE_SIDE))),
    mk_gain_file => GainRefModel(mk_gain((FILE_SIDE, FILE_SIDE))),
    mk_linearity_file => LinearityRefModel(mk_linearity((FILE_PLANES, FILE_SIDE, FILE_SIDE))),
    mk_mask_file => MaskRefModel(mk_mask((FILE_SIDE, FILE_SIDE))),
    mk_pixelarea_file => PixelareaRefModel(mk_pixelarea((FILE_SIDE, FILE_SIDE))),
    mk_readnoise_file => ReadnoiseRefModel(mk_readnoise((FILE_SIDE, FILE_SIDE))),
    mk_saturation_file => SaturationRefModel(mk_saturation((FILE_SIDE, FILE_SIDE))),
    mk_superbias_file => SuperbiasRefModel(mk_superbias((FILE_SIDE, FILE_SIDE))),
    /// Photometry table has no arrays, so there is no shape
    mk_wfi_img_photom_file => WfiImgPhotomRefModel(mk_wfi_img_photom()),
}

/// Write a valid file for `kind` with default shapes and return the model written
pub fn mk_file(kind: ModelKind, path: impl AsRef<Path>) -> Result<AnyModel> {
    match kind {
        ModelKind::WfiImage => mk_level2_image_file(path).map(Into::into),
        ModelKind::DarkRef => mk_dark_file(path).map(Into::into),
        ModelKind::FlatRef => mk_flat_file(path).map(Into::into),
        ModelKind::GainRef => mk_gain_file(path).map(Into::into),
        ModelKind::LinearityRef => mk_linearity_file(path).map(Into::into),
        ModelKind::MaskRef => mk_mask_file(path).map(Into::into),
        ModelKind::PixelareaRef => mk_pixelarea_file(path).map(Into::into),
        ModelKind::ReadnoiseRef => mk_readnoise_file(path).map(Into::into),
        ModelKind::SaturationRef => mk_saturation_file(path).map(Into::into),
        ModelKind::SuperbiasRef => mk_superbias_file(path).map(Into::into),
        ModelKind::WfiImgPhotomRef => mk_wfi_img_photom_file(path).map(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::registry;

    #[test]
    fn test_factories_are_tagged_for_their_kind() {
        let nodes = [
            (ModelKind::WfiImage, mk_level2_image((4, 4))),
            (ModelKind::DarkRef, mk_dark((2, 4, 4))),
            (ModelKind::LinearityRef, mk_linearity((3, 4, 4))),
            (ModelKind::WfiImgPhotomRef, mk_wfi_img_photom()),
        ];
        let registry = registry().unwrap();
        for (kind, node) in nodes {
            let tag = node.tag().unwrap();
            assert_eq!(registry.resolve(tag).unwrap().kind, kind);
        }
    }

    #[test]
    fn test_ref_common_reftype() {
        let meta = mk_ref_common(ModelKind::SuperbiasRef);
        assert_eq!(meta.str_value("reftype").unwrap(), "BIAS");
        assert_eq!(
            meta.get_path("instrument.optical_element").unwrap().as_str(),
            Some("F158")
        );
    }

    #[test]
    fn test_ramp_values() {
        let node = mk_gain((2, 3));
        let data = node.array("data").unwrap();
        assert_eq!(data.shape(), &[2, 3]);
        assert_eq!(data.as_f32().unwrap()[4], 2.0);
    }

    #[test]
    fn test_every_factory_validates() {
        let models: Vec<AnyModel> = vec![
            ImageModel::new(mk_level2_image((4, 4))).unwrap().into(),
            DarkRefModel::new(mk_dark((2, 4, 4))).unwrap().into(),
            FlatRefModel::new(mk_flat((4, 4))).unwrap().into(),
            GainRefModel::new(mk_gain((4, 4))).unwrap().into(),
            LinearityRefModel::new(mk_linearity((2, 4, 4))).unwrap().into(),
            MaskRefModel::new(mk_mask((4, 4))).unwrap().into(),
            PixelareaRefModel::new(mk_pixelarea((4, 4))).unwrap().into(),
            ReadnoiseRefModel::new(mk_readnoise((4, 4))).unwrap().into(),
            SaturationRefModel::new(mk_saturation((4, 4))).unwrap().into(),
            SuperbiasRefModel::new(mk_superbias((4, 4))).unwrap().into(),
            WfiImgPhotomRefModel::new(mk_wfi_img_photom()).unwrap().into(),
        ];
        for model in &models {
            if let Err(e) = model.validate() {
                panic!("{} failed validation: {}", model.kind(), e);
            }
        }
    }
}
