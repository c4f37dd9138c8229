//! Catalog loading.
//!
//! Both catalogs are TOML documents loaded once at startup and immutable for
//! the process lifetime. Load failures are fatal: parse problems and
//! duplicate mapping keys map to exit code 2, cross-reference problems
//! (blank device ids, empty device lists) to exit code 3.

mod device;
mod mapping;

pub use device::DeviceCatalog;
pub use mapping::{MappingCatalog, MappingRule};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Duplicate mapping key ({equip_tag}, {message_id})")]
    DuplicateKey { equip_tag: String, message_id: String },
    #[error("Catalog reference error: {0}")]
    Reference(String),
}

impl CatalogError {
    /// True for errors that map to exit code 3 rather than 2.
    pub fn is_reference(&self) -> bool {
        matches!(self, CatalogError::Reference(_))
    }
}
