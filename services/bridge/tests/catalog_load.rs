//! File-based catalog loading tests, including the exit-code split between
//! parse errors (2) and reference errors (3).

use bridge::catalog::{CatalogError, DeviceCatalog, MappingCatalog};
use bridge::supervisor::BridgeError;
use std::io::Write;
use std::path::Path;

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn catalogs_load_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let mappings = write_file(
        dir.path(),
        "mappings.toml",
        r#"
        [[mappings]]
        equip_tag = "GPS001"
        message_id = "GLL001"
        object = "GPS.LAT"
        value_type = "float"
        "#,
    );
    let devices = write_file(
        dir.path(),
        "devices.toml",
        r#"
        [objects]
        "GPS.LAT" = ["VM-A", "VM-B"]
        "#,
    );

    let mapping = MappingCatalog::load(&mappings).unwrap();
    assert_eq!(mapping.lookup("GPS001", "GLL001").unwrap().object, "GPS.LAT");

    let device = DeviceCatalog::load(&devices).unwrap();
    assert_eq!(device.devices_for("GPS.LAT"), ["VM-A", "VM-B"]);
}

#[test]
fn missing_catalog_file_maps_to_exit_code_2() {
    let err = MappingCatalog::load(Path::new("/nonexistent/mappings.toml")).unwrap_err();
    assert_eq!(BridgeError::Catalog(err).exit_code(), 2);
}

#[test]
fn duplicate_mapping_key_maps_to_exit_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let mappings = write_file(
        dir.path(),
        "mappings.toml",
        r#"
        [[mappings]]
        equip_tag = "A"
        message_id = "B"
        object = "X"
        value_type = "text"

        [[mappings]]
        equip_tag = "A"
        message_id = "B"
        object = "Y"
        value_type = "text"
        "#,
    );
    let err = MappingCatalog::load(&mappings).unwrap_err();
    assert!(matches!(err, CatalogError::DuplicateKey { .. }));
    assert_eq!(BridgeError::Catalog(err).exit_code(), 2);
}

#[test]
fn empty_device_list_maps_to_exit_code_3() {
    let dir = tempfile::tempdir().unwrap();
    let devices = write_file(
        dir.path(),
        "devices.toml",
        r#"
        [objects]
        "GPS.LAT" = []
        "#,
    );
    let err = DeviceCatalog::load(&devices).unwrap_err();
    assert!(err.is_reference());
    assert_eq!(BridgeError::Catalog(err).exit_code(), 3);
}
