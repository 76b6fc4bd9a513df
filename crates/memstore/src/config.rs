use std::path::Path;

use memstore_payload::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Store configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// page_size = 4096
/// use_page_set = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemStoreConfig {
    /// Bytes per page for paged payloads. Must be a power of two.
    pub page_size: u64,
    /// Whether new collections store object data in pages (`true`) or in a
    /// single contiguous buffer (`false`).
    pub use_page_set: bool,
    pub max_object_name_len: usize,
    pub max_attr_name_len: usize,
    /// Largest object size, in bytes, that a write, zero, truncate or
    /// clone may produce.
    pub max_object_size: u64,
}

/// Default `max_object_size`: 128 MiB.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 128 * 1024 * 1024;

impl Default for MemStoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            use_page_set: true,
            max_object_name_len: 4096,
            max_attr_name_len: 256,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        }
    }
}

impl MemStoreConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(StoreError::InvalidConfig(format!(
                "page_size must be a non-zero power of two, got {}",
                self.page_size
            )));
        }
        if self.max_object_name_len == 0 || self.max_attr_name_len == 0 {
            return Err(StoreError::InvalidConfig(
                "name length limits must be non-zero".to_string(),
            ));
        }
        if self.max_object_size == 0 {
            return Err(StoreError::InvalidConfig(
                "max_object_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
