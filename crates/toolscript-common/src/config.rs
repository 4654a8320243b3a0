//! Configuration structures for toolscript.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, optimization)
//! - [`ExecutionConfig`]: Per-call execution limits (fuel, memory)
//! - [`ScriptConfig`]: Where scripts are looked up and what they may touch

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable holding extra script directories, separated like `PATH`.
pub const SCRIPT_PATH_ENV: &str = "TOOLSCRIPT_PATH";

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the runtime.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Script lookup configuration.
    #[serde(default)]
    pub scripts: ScriptConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the process-wide engine started by the first tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for instance creation.
    ///
    /// Reserves memory for `max_instances` instances up front.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Optimize generated code for speed instead of compile time.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            optimize: defaults::optimize(),
        }
    }
}

/// Per-call execution configuration.
///
/// These settings bound every entry point call made on a script.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (instructions) per entry point call.
    ///
    /// Running out of fuel traps the call, which is handled as a call fault.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory in megabytes for one script instance.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Number of recent guest log lines kept per script; older lines are dropped.
    #[serde(default = "defaults::max_guest_logs")]
    pub max_guest_logs: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
            max_guest_logs: defaults::max_guest_logs(),
        }
    }
}

impl ExecutionConfig {
    /// Memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Script lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptConfig {
    /// Directories searched, in order, for `<name>.wasm` and `<name>.wat`.
    #[serde(default)]
    pub search_path: Vec<PathBuf>,

    /// Also search the directories listed in `TOOLSCRIPT_PATH`.
    #[serde(default = "defaults::use_env_path")]
    pub use_env_path: bool,

    /// Give scripts WASI stdout/stderr.
    #[serde(default = "defaults::inherit_stdio")]
    pub inherit_stdio: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            use_env_path: defaults::use_env_path(),
            inherit_stdio: defaults::inherit_stdio(),
        }
    }
}

impl ScriptConfig {
    /// Create a config that searches only the given directories.
    pub fn with_search_path<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_path: dirs.into_iter().map(Into::into).collect(),
            use_env_path: false,
            ..Default::default()
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        100
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        128
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn max_guest_logs() -> usize {
        256
    }

    pub const fn use_env_path() -> bool {
        true
    }

    pub const fn inherit_stdio() -> bool {
        true
    }
}
