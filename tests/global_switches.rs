//! Process-wide switches
//!
//! Kept in its own test binary with a single test: the switches are
//! global, so toggling them would race with any other test in the process.

use std::fs;

use roman_datamodels::config::{self, DataModelConfig};
use roman_datamodels::{open, testing, ImageModel, OpenOptions};

#[test]
fn test_global_switches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.asdf");
    testing::mk_level2_image_file(&path).unwrap();

    let content = fs::read(&path).unwrap();
    let at = content.windows(5).position(|w| w == b"ROMAN").unwrap();
    let mut mangled = content.clone();
    mangled[at] = b'X';
    fs::write(&path, mangled).unwrap();

    assert!(open(&path).unwrap_err().is_validation());

    // validate_on_read off via config
    let mut cfg = DataModelConfig::default();
    cfg.io.validate_on_read = false;
    cfg.apply();
    assert!(!OpenOptions::default().validate_on_read);
    let model = open(&path).unwrap();
    assert_eq!(model.get_path("meta.telescope").unwrap().as_str(), Some("XOMAN"));
    assert!(OpenOptions::new().validate_on_read(true).open(&path).is_err());
    config::set_validate_on_read(true);

    // validate_on_assignment off: bad values are accepted until full validation
    let mut image = ImageModel::new(testing::mk_level2_image((4, 4))).unwrap();
    config::set_validate_on_assignment(false);
    image.meta_mut().unwrap().set("telescope", "NOTROMAN").unwrap();
    config::set_validate_on_assignment(true);
    assert!(image.validate().unwrap_err().is_validation());
    assert!(image.meta_mut().unwrap().set("telescope", "NOTROMAN").is_err());

    // verify_checksums off: a flipped array byte is read back as-is
    let good = dir.path().join("gain.asdf");
    testing::mk_gain_file(&good).unwrap();
    let mut bytes = fs::read(&good).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&good, bytes).unwrap();
    assert!(open(&good).is_err());
    config::set_verify_checksums(false);
    assert!(open(&good).is_ok());
    config::set_verify_checksums(true);
}
