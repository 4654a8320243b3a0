//! Common types, errors, and utilities for toolscript.
//!
//! This crate provides shared functionality used across the toolscript workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtime settings and tool chain files
//! - The host services lent to scripts: [`Store`], [`DataModel`], [`Logger`]

pub mod config;
pub mod config_file;
pub mod datamodel;
pub mod error;
pub mod logger;
pub mod store;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig, SCRIPT_PATH_ENV, ScriptConfig};
pub use config_file::{ConfigFile, ConfigFileError, ToolChainSettings, ToolEntry};
pub use datamodel::DataModel;
pub use error::{ErrorKind, HostFunctionError, ScriptError, StoreError};
pub use logger::{LogLevel, Logger};
pub use store::{SharedStore, Store};
