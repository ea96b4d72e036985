//! Engine configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Result, StrataError};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "STRATA_CONFIG";

/// Tunables shared by the query and mutation engines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage table holding every triple.
    pub table: String,
    /// Page size applied when a connection names neither `first`/`last` nor a size.
    pub default_page_size: usize,
    /// Largest page a caller may request.
    pub max_page_size: usize,
    /// Multiplier applied to the wanted count to size a storage round.
    pub pre_filter_factor: usize,
    /// Upper bound for the rows fetched by one storage round.
    pub max_pre_filtered_size: usize,
    /// Default consistency for executions that do not request it explicitly.
    pub consistent_read: bool,
    /// Capacity of the per-execution node cache used by edge resolution.
    pub resolve_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table: "triples".to_owned(),
            default_page_size: 25,
            max_page_size: 1000,
            pre_filter_factor: 2,
            max_pre_filtered_size: 2000,
            consistent_read: false,
            resolve_cache_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Loads `$STRATA_CONFIG` or the per-user config file, falling back to defaults.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| StrataError::Config(err.to_string()))
    }

    /// Rejects settings the engines cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(StrataError::Config("table cannot be empty".into()));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(StrataError::Config("page sizes must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(StrataError::Config(
                "default_page_size exceeds max_page_size".into(),
            ));
        }
        if self.pre_filter_factor == 0 {
            return Err(StrataError::Config("pre_filter_factor must be positive".into()));
        }
        if self.max_pre_filtered_size < self.max_page_size {
            return Err(StrataError::Config(
                "max_pre_filtered_size must be at least max_page_size".into(),
            ));
        }
        Ok(())
    }

    /// Rows to request per storage round when `wanted` survivors are needed.
    pub fn pre_filtered_size(&self, wanted: usize, filtered: bool) -> usize {
        let factor = if filtered { self.pre_filter_factor } else { 1 };
        wanted
            .max(1)
            .saturating_mul(factor)
            .min(self.max_pre_filtered_size)
            .max(wanted)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("strata").join("config.toml"))
}
