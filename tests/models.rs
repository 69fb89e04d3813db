//! Model Tests
//!
//! End-to-end behaviour of the data models: schemas, validation on
//! assignment, on save and on read, and tag-dispatched opening.

use std::fs;
use std::path::{Path, PathBuf};

use rstest::rstest;
use serde_json::json;

use roman_datamodels::ndarray::DataType;
use roman_datamodels::registry::registry;
use roman_datamodels::schema::schema_store;
use roman_datamodels::{
    container, open, open_with, testing, AnyModel, DataModelError, FlatRefModel, GainRefModel,
    ImageModel, JsonSchemaValidator, ModelKind, NdArray, Node, OpenOptions, PixelareaRefModel,
    ReadnoiseRefModel, ValidationState, WfiImgPhotomRefModel,
};

fn no_validation() -> OpenOptions {
    OpenOptions::new().validate_on_read(false)
}

/// Replace the first occurrence of `from` in the file with `to`
fn mangle(path: &Path, from: &str, to: &str) {
    let content = fs::read(path).unwrap();
    let at = content
        .windows(from.len())
        .position(|w| w == from.as_bytes())
        .expect("pattern present in file");
    let mut mangled = content[..at].to_vec();
    mangled.extend_from_slice(to.as_bytes());
    mangled.extend_from_slice(&content[at + from.len()..]);
    fs::write(path, mangled).unwrap();
}

fn telescope(model: &AnyModel) -> String {
    model.get_path("meta.telescope").unwrap().as_str().unwrap().to_string()
}

// =============================================================================
// Core Schema
// =============================================================================

#[test]
fn test_core_schema_assignment_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.asdf");
    let mut image = ImageModel::new(testing::mk_level2_image((8, 8))).unwrap();

    let err = image.meta_mut().unwrap().set("telescope", "NOTROMAN").unwrap_err();
    assert!(err.is_validation());
    assert_eq!(image.get_path("meta.telescope").unwrap().as_str(), Some("ROMAN"));

    image.meta_mut().unwrap().insert_unchecked("telescope", "NOTROMAN").unwrap();
    match image.validate().unwrap_err() {
        DataModelError::Validation { path, .. } => assert_eq!(path, "/meta/telescope"),
        other => panic!("Expected Validation, got {:?}", other),
    }
    assert!(image.save(&path).is_err());

    image.meta_mut().unwrap().set("telescope", "ROMAN").unwrap();
    image.save(&path).unwrap();

    mangle(&path, "ROMAN", "XOMAN");
    assert!(open(&path).unwrap_err().is_validation());

    let model = open_with(&path, &no_validation()).unwrap();
    assert_eq!(telescope(&model), "XOMAN");
    assert_eq!(model.state(), ValidationState::Unvalidated);
}

#[test]
fn test_length_changing_corruption_is_still_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.asdf");
    testing::mk_level2_image_file(&path).unwrap();

    mangle(&path, "ROMAN", "NOTROMAN");
    let err = open(&path).unwrap_err();
    assert!(err.is_validation());

    let model = open_with(&path, &no_validation()).unwrap();
    assert_eq!(telescope(&model), "NOTROMAN");
    assert_eq!(model.data().unwrap().shape(), &[20, 20]);
}

// =============================================================================
// Schema Store
// =============================================================================

#[test]
fn test_reference_schemas_include_ref_common() {
    let store = schema_store().unwrap();
    for kind in ModelKind::all().iter().filter(|k| k.is_reference_file()) {
        let raw = store.load_schema(&kind.schema_uri()).unwrap();
        let members = raw["properties"]["meta"]["allOf"].as_array().unwrap();
        assert!(
            members.contains(&json!({"$ref": "ref_common-1.0.0"})),
            "{} does not include ref_common",
            kind
        );
    }
}

#[test]
fn test_every_schema_resolves_and_compiles() {
    let store = schema_store().unwrap();
    assert!(store.len() >= ModelKind::all().len());
    for id in store.ids() {
        let resolved = store.resolve(id).unwrap();
        assert!(!resolved.to_string().contains("$ref"), "{} kept a $ref", id);
        JsonSchemaValidator::violations(&resolved, &json!({}), id).unwrap();
    }
}

#[test]
fn test_every_kind_is_registered() {
    let registry = registry().unwrap();
    for kind in ModelKind::all() {
        let entry = registry.entry_for_kind(*kind).unwrap();
        assert_eq!(entry.schema_uri, kind.schema_uri());
    }
}

// =============================================================================
// Opening Files
// =============================================================================

#[rstest]
#[case::image(ModelKind::WfiImage)]
#[case::dark(ModelKind::DarkRef)]
#[case::flat(ModelKind::FlatRef)]
#[case::gain(ModelKind::GainRef)]
#[case::linearity(ModelKind::LinearityRef)]
#[case::mask(ModelKind::MaskRef)]
#[case::pixelarea(ModelKind::PixelareaRef)]
#[case::readnoise(ModelKind::ReadnoiseRef)]
#[case::saturation(ModelKind::SaturationRef)]
#[case::superbias(ModelKind::SuperbiasRef)]
#[case::photom(ModelKind::WfiImgPhotomRef)]
fn test_open_dispatches_on_tag(#[case] kind: ModelKind) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{}.asdf", kind.model_name()));
    let written = testing::mk_file(kind, &path).unwrap();

    let model = open(&path).unwrap();
    assert_eq!(model.node(), written.node());
    assert_eq!(model.kind(), kind);
    assert_eq!(model.tag(), kind.tag());
    assert_eq!(model.state(), ValidationState::Validated);
    assert_eq!(model.source(), Some(path.as_path()));
    if let Some(reftype) = kind.reftype() {
        assert_eq!(model.get_path("meta.reftype").unwrap().as_str(), Some(reftype));
    }
    assert_eq!(
        model.get_path("meta.instrument.optical_element").unwrap().as_str(),
        Some("F158")
    );
}

#[test]
fn test_typed_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.asdf");
    let written = testing::mk_flat_file(&path).unwrap();

    let flat = FlatRefModel::open(&path).unwrap();
    assert_eq!(flat.data().unwrap(), written.data().unwrap());
    assert_eq!(flat.dq().unwrap().dtype(), DataType::Uint32);
    assert_eq!(flat.err().unwrap().shape(), &[20, 20]);

    let err = GainRefModel::open(&path).unwrap_err();
    assert!(matches!(err, DataModelError::TagMismatch { .. }));
}

#[test]
fn test_open_unknown_tag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipc.asdf");
    let mut node = testing::mk_gain((4, 4));
    node.set_tag("asdf://stsci.edu/datamodels/roman/tags/reference_files/ipc-1.0.0");
    container::write_file(&path, &node).unwrap();

    let err = open(&path).unwrap_err();
    assert!(matches!(err, DataModelError::UnknownTag(_)));
}

#[test]
fn test_open_newer_tag_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gain.asdf");
    let mut node = testing::mk_gain((4, 4));
    node.set_tag("asdf://stsci.edu/datamodels/roman/tags/reference_files/gain-1.2.0");
    container::write_file(&path, &node).unwrap();

    let model = open(&path).unwrap();
    assert_eq!(model.kind(), ModelKind::GainRef);
    assert_eq!(
        model.schema_uri(),
        "asdf://stsci.edu/datamodels/roman/schemas/reference_files/gain-1.0.0"
    );
}

#[test]
fn test_open_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = open(dir.path().join("missing.asdf")).unwrap_err();
    assert!(matches!(err, DataModelError::Io(_)));
}

// =============================================================================
// Attributes
// =============================================================================

#[test]
fn test_add_model_attribute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("testreadnoise.asdf");
    let mut readnoise = ReadnoiseRefModel::new(testing::mk_readnoise((20, 20))).unwrap();

    readnoise.set("new_attribute", 77).unwrap();
    assert_eq!(readnoise.get("new_attribute").unwrap().as_i64(), Some(77));

    let err = readnoise.set("_underscore", "bad").unwrap_err();
    assert!(matches!(err, DataModelError::ReservedKey(_)));

    readnoise.save(&path).unwrap();

    let mut model = open(&path).unwrap();
    assert_eq!(model.get("new_attribute").unwrap().as_i64(), Some(77));
    model.set("new_attribute", 88).unwrap();
    assert_eq!(model.get("new_attribute").unwrap().as_i64(), Some(88));

    let err = model.set("data", "bad data value").unwrap_err();
    assert!(err.is_validation());
    assert_eq!(model.data().unwrap().shape(), &[20, 20]);
}

#[test]
fn test_assignment_rejects_wrong_array() {
    let mut flat = FlatRefModel::new(testing::mk_flat((4, 4))).unwrap();
    let err = flat.set("data", NdArray::zeros(DataType::Uint32, vec![4, 4])).unwrap_err();
    assert!(err.is_validation());
    let err = flat.set("data", NdArray::zeros(DataType::Float32, vec![2, 4, 4])).unwrap_err();
    assert!(err.is_validation());
    flat.set("data", NdArray::zeros(DataType::Float32, vec![8, 8])).unwrap();
    assert_eq!(flat.data().unwrap().shape(), &[8, 8]);
}

#[test]
fn test_nested_assignment_uses_fragment() {
    let mut image = ImageModel::new(testing::mk_level2_image((4, 4))).unwrap();
    let instrument = image.meta_mut().unwrap().node_mut("instrument").unwrap();
    assert!(instrument.set("optical_element", "F999").unwrap_err().is_validation());
    instrument.set("optical_element", "F184").unwrap();
    image.validate().unwrap();
}

#[test]
fn test_reftype_checked_on_assignment() {
    let mut flat = FlatRefModel::new(testing::mk_flat((4, 4))).unwrap();
    let err = flat.meta_mut().unwrap().set("reftype", "DARK").unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_partial_validation_is_weaker_than_full() {
    let mut image = ImageModel::new(Node::new()).unwrap();
    image.set("data", NdArray::zeros(DataType::Float32, vec![4, 4])).unwrap();
    let err = image.validate().unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_replacing_meta_validates_subtree() {
    let mut gain = GainRefModel::new(testing::mk_gain((4, 4))).unwrap();
    let mut meta = testing::mk_ref_common(ModelKind::GainRef);
    meta.insert_unchecked("pedigree", "GUESS").unwrap();
    let err = gain.set("meta", meta).unwrap_err();
    match err {
        DataModelError::Validation { path, .. } => assert!(path.starts_with("/meta")),
        other => panic!("Expected Validation, got {:?}", other),
    }
}

// =============================================================================
// Saving
// =============================================================================

#[test]
fn test_invalid_save_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invalid.asdf");
    let mut node = testing::mk_gain((4, 4));
    node.remove("data");
    let gain = GainRefModel::new(node).unwrap();

    assert!(gain.save(&path).unwrap_err().is_validation());
    assert!(!path.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_save_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("gain.asdf");
    testing::mk_gain_file(&path).unwrap();

    let mut gain = GainRefModel::open(&path).unwrap();
    gain.meta_mut().unwrap().set("description", "updated").unwrap();
    gain.save(&path).unwrap();

    let back = GainRefModel::open(&path).unwrap();
    assert_eq!(back.meta().unwrap().str_value("description").unwrap(), "updated");
}

// =============================================================================
// Product Content
// =============================================================================

#[test]
fn test_pixelarea_photometry_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("area.asdf");
    testing::mk_pixelarea_file(&path).unwrap();

    let area = PixelareaRefModel::open(&path).unwrap();
    let photometry = area.meta().unwrap().node("photometry").unwrap();
    assert!((photometry.f64_value("pixelarea_steradians").unwrap() - 2.31e-14).abs() < 1e-20);
    assert!(photometry.f64_value("pixelarea_arcsecsq").is_ok());
}

#[test]
fn test_photom_table_nulls_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photom.asdf");
    testing::mk_wfi_img_photom_file(&path).unwrap();

    let photom = WfiImgPhotomRefModel::open(&path).unwrap();
    let table = photom.node().node("phot_table").unwrap();
    assert!(table.node("W146").unwrap().f64_value("photmjsr").is_ok());
    assert!(table.node("DARK").unwrap().get("photmjsr").unwrap().as_f64().is_none());
}

#[test]
fn test_photom_rejects_unknown_element() {
    let mut node = testing::mk_wfi_img_photom();
    let table = node.node_mut("phot_table").unwrap();
    let row = table.node("F158").unwrap().clone();
    table.insert_unchecked("F999", row).unwrap();
    let photom = WfiImgPhotomRefModel::new(node).unwrap();
    assert!(photom.validate().unwrap_err().is_validation());
}
