//! Tool chain configuration file.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ToolChainSettings`]: How the chain is driven
//! - [`ToolEntry`]: One script tool in the chain

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;
use crate::logger::LogLevel;

/// Top-level configuration file structure.
///
/// Relative paths in a file loaded with [`ConfigFile::from_file`] are
/// resolved against the directory containing that file.
///
/// # Example
///
/// ```toml
/// [runtime.execution]
/// max_fuel = 10_000_000
///
/// [runtime.scripts]
/// search_path = ["./tools"]
///
/// [toolchain]
/// iterations = 10
/// log_level = "info"
///
/// [[tools]]
/// name = "dummy"
/// config = "./configfiles/DummyToolConfig"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + execution + script lookup).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Chain driver settings.
    #[serde(default)]
    pub toolchain: ToolChainSettings,

    /// Tools, in execution order.
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Rebase relative tool config paths and search directories onto `base`.
    ///
    /// An empty tool config path is treated as no config file.
    pub fn resolve_relative(&mut self, base: &Path) {
        for dir in &mut self.runtime.scripts.search_path {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        for tool in &mut self.tools {
            if tool.config.as_ref().is_some_and(|c| c.as_os_str().is_empty()) {
                tool.config = None;
            }
            if let Some(config) = tool.config.as_mut().filter(|c| c.is_relative()) {
                *config = base.join(&*config);
            }
        }
    }
}

/// Chain driver settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolChainSettings {
    /// Number of execute cycles; 0 runs until interrupted.
    #[serde(default = "defaults::iterations")]
    pub iterations: u64,

    /// Lowest level the chain logger passes through from scripts.
    #[serde(default = "defaults::log_level")]
    pub log_level: LogLevel,
}

impl Default for ToolChainSettings {
    fn default() -> Self {
        Self {
            iterations: defaults::iterations(),
            log_level: defaults::log_level(),
        }
    }
}

/// A script tool in the chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolEntry {
    /// Display name of the tool instance.
    pub name: String,

    /// Path to the tool's key/value config file.
    #[serde(default)]
    pub config: Option<PathBuf>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    use crate::logger::LogLevel;

    pub const fn iterations() -> u64 {
        1
    }

    pub const fn log_level() -> LogLevel {
        LogLevel::Info
    }
}
