use std::path::Path;

use serde::{Deserialize, Serialize};
use vpack_store::CompoundConfig;

use crate::error::{ManagerError, ManagerResult};

/// Configuration for a [`PackageManager`](crate::PackageManager).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Close each package after every operation instead of keeping its
    /// handle open until `close_package` or `dispose`.
    pub auto_flush: bool,
    /// Settings for the compound file engine.
    pub engine: CompoundConfig,
}

impl ManagerConfig {
    /// Configuration that closes packages after every operation.
    pub fn auto_flush() -> Self {
        Self {
            auto_flush: true,
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> ManagerResult<Self> {
        toml::from_str(input).map_err(|e| ManagerError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> ManagerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ManagerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}
