//! Mapping catalog: `(equip_tag, message_id)` -> `(object, value_type)`.
//!
//! Document shape:
//!
//! ```toml
//! [[mappings]]
//! equip_tag = "GPS001"
//! message_id = "GLL001"
//! object = "GPS.LAT"
//! value_type = "float"
//! ```

use super::CatalogError;
use bridge_protocol::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One immutable mapping rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub equip_tag: String,
    pub message_id: String,
    pub object: String,
    pub value_type: ValueType,
}

#[derive(Debug, Serialize, Deserialize)]
struct MappingDoc {
    #[serde(default)]
    mappings: Vec<MappingRule>,
}

/// Immutable lookup table from `(equip_tag, message_id)` to a rule.
///
/// Rules are kept in document order so the catalog serializes back to the
/// document it was loaded from.
#[derive(Debug)]
pub struct MappingCatalog {
    rules: Vec<MappingRule>,
    index: HashMap<(String, String), usize>,
}

impl MappingCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::Io(format!("reading mapping catalog '{}': {}", path.display(), e))
        })?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Self, CatalogError> {
        let doc: MappingDoc =
            toml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let mut index = HashMap::with_capacity(doc.mappings.len());
        for (i, rule) in doc.mappings.iter().enumerate() {
            let key = (rule.equip_tag.clone(), rule.message_id.clone());
            if index.insert(key, i).is_some() {
                return Err(CatalogError::DuplicateKey {
                    equip_tag: rule.equip_tag.clone(),
                    message_id: rule.message_id.clone(),
                });
            }
        }
        Ok(MappingCatalog { rules: doc.mappings, index })
    }

    pub fn lookup(&self, equip_tag: &str, message_id: &str) -> Option<&MappingRule> {
        let key = (equip_tag.to_owned(), message_id.to_owned());
        self.index.get(&key).map(|&i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate rules in document order.
    pub fn rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter()
    }

    /// Serialize back to the document form it was loaded from.
    pub fn to_document(&self) -> String {
        let doc = MappingDoc { mappings: self.rules.clone() };
        toml::to_string(&doc).expect("mapping rules always serialize")
    }
}

impl PartialEq for MappingCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules
    }
}
