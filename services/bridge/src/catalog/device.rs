//! Device catalog: object name -> ordered device-id list.
//!
//! Document shape:
//!
//! ```toml
//! [objects]
//! "GPS.LAT" = ["VM-A"]
//! "ENG.RPM" = ["VM-A", "VM-B", "VM-C"]
//! ```
//!
//! List order is the fan-out order. Duplicate device ids in one list are
//! preserved and produce duplicate sends.

use super::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct DeviceDoc {
    #[serde(default)]
    objects: BTreeMap<String, Vec<String>>,
}

/// Immutable lookup table from object name to its subscriber devices.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceCatalog {
    objects: BTreeMap<String, Vec<String>>,
}

impl DeviceCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::Io(format!("reading device catalog '{}': {}", path.display(), e))
        })?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Self, CatalogError> {
        let doc: DeviceDoc = toml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;

        for (object, devices) in &doc.objects {
            if devices.is_empty() {
                return Err(CatalogError::Reference(format!(
                    "object \"{object}\" has an empty device list"
                )));
            }
            if let Some(blank) = devices.iter().find(|d| d.trim().is_empty()) {
                return Err(CatalogError::Reference(format!(
                    "object \"{object}\" has a blank device id ({blank:?})"
                )));
            }
        }
        Ok(DeviceCatalog { objects: doc.objects })
    }

    /// The devices subscribed to `object`, in fan-out order.
    ///
    /// Unknown objects yield an empty slice; the resolver turns that into a
    /// `no_targets` drop, not an error.
    pub fn devices_for(&self, object: &str) -> &[String] {
        self.objects.get(object).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serialize back to the document form it was loaded from.
    pub fn to_document(&self) -> String {
        let doc = DeviceDoc { objects: self.objects.clone() };
        toml::to_string(&doc).expect("device lists always serialize")
    }
}
