//! Error types for toolscript.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`ScriptError`]: Lifecycle errors of a script tool (load, call, teardown)
//! - [`HostFunctionError`]: Errors from host function implementations
//! - [`StoreError`]: Errors from the key/value configuration store
//!
//! Every [`ScriptError`] maps onto an [`ErrorKind`] so callers can tell the
//! failure tiers apart without parsing log text.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The tool configuration is missing a key or could not be read.
    Config,
    /// The script module could not be found, compiled, or instantiated.
    LoadNotFound,
    /// The module does not export the four entry points with the expected signatures.
    ContractViolation,
    /// A bootstrap argument could not be encoded for the guest.
    MarshalFailure,
    /// The guest trapped; the call produced no return value.
    CallFault,
    /// The guest returned a falsy integer.
    LogicalFailure,
    /// The tool was driven out of order.
    Usage,
    /// The embedded runtime itself failed (engine setup, host linker).
    Runtime,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::LoadNotFound => "load-not-found",
            ErrorKind::ContractViolation => "contract-violation",
            ErrorKind::MarshalFailure => "marshal-failure",
            ErrorKind::CallFault => "call-fault",
            ErrorKind::LogicalFailure => "logical-failure",
            ErrorKind::Usage => "usage",
            ErrorKind::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Errors raised while driving a script tool through its lifecycle.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The tool configuration store rejected a lookup or could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] StoreError),

    /// No module with the given name exists on the search path.
    #[error("Script '{script}' not found (searched {} directories)", searched.len())]
    ModuleNotFound {
        /// The script base name.
        script: String,
        /// Directories that were searched.
        searched: Vec<PathBuf>,
    },

    /// The module was found but could not be compiled or instantiated.
    #[error("Script '{script}' failed to load: {reason}")]
    CompilationFailed {
        /// The script base name.
        script: String,
        /// Runtime error text.
        reason: String,
    },

    /// One or more required entry points are missing or have the wrong shape.
    #[error("Script '{script}' violates the entry point contract: {reason}")]
    ContractViolation {
        /// The script base name.
        script: String,
        /// Which entry points failed and why.
        reason: String,
    },

    /// A bootstrap handle could not be encoded as a guest integer.
    #[error("Cannot convert bootstrap argument {index} for script '{script}': {reason}")]
    MarshalFailed {
        /// The script base name.
        script: String,
        /// Position in the argument triple.
        index: usize,
        /// Description of the failure.
        reason: String,
    },

    /// The guest trapped inside an entry point.
    #[error("Error invoking {entry_point} for script '{script}': {message}")]
    CallFault {
        /// The script base name.
        script: String,
        /// The entry point that was running.
        entry_point: &'static str,
        /// Trap description.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// The guest returned zero from an entry point.
    #[error("Error in {entry_point} for script '{script}'")]
    LogicalFailure {
        /// The script base name.
        script: String,
        /// The entry point that reported failure.
        entry_point: &'static str,
    },

    /// `load` was called on a tool that already holds a module.
    #[error("Script '{script}' is already loaded")]
    AlreadyLoaded {
        /// The script base name.
        script: String,
    },

    /// Invalid runtime configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl ScriptError {
    /// Create a new `ModuleNotFound` error.
    pub fn module_not_found(script: impl Into<String>, searched: Vec<PathBuf>) -> Self {
        Self::ModuleNotFound {
            script: script.into(),
            searched,
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(script: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            script: script.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `ContractViolation` error.
    pub fn contract_violation(script: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            script: script.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::ModuleNotFound { .. } | Self::CompilationFailed { .. } => ErrorKind::LoadNotFound,
            Self::ContractViolation { .. } => ErrorKind::ContractViolation,
            Self::MarshalFailed { .. } => ErrorKind::MarshalFailure,
            Self::CallFault { .. } => ErrorKind::CallFault,
            Self::LogicalFailure { .. } => ErrorKind::LogicalFailure,
            Self::AlreadyLoaded { .. } => ErrorKind::Usage,
            Self::InvalidConfig { .. } => ErrorKind::Runtime,
        }
    }

    /// Returns `true` if this error indicates the module was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound { .. })
    }

    /// Returns `true` for failures that leave the tool unloaded when raised by `load`.
    pub fn is_fatal_to_load(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LoadNotFound | ErrorKind::ContractViolation | ErrorKind::MarshalFailure
        )
    }

    /// Returns `true` if a later `execute` may succeed without reloading.
    ///
    /// Only a falsy return keeps the module loaded; every other tier tears it down.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::LogicalFailure
    }
}

/// Errors from host function implementations.
///
/// These are reported back to the guest as negative status codes and logged;
/// they never abort the guest call on their own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostFunctionError {
    /// The handle was never granted to this script instance.
    #[error("Unknown capability handle: {handle}")]
    InvalidHandle {
        /// The raw handle value passed by the guest.
        handle: i64,
    },

    /// The handle refers to a different service than the function expects.
    #[error("Capability handle {handle} refers to {actual}, expected {expected}")]
    WrongService {
        /// The raw handle value passed by the guest.
        handle: i64,
        /// The service the function needs.
        expected: &'static str,
        /// The service the handle refers to.
        actual: &'static str,
    },

    /// Guest memory access was out of bounds or the module exports no memory.
    #[error("Guest memory access failed: {reason}")]
    MemoryAccess {
        /// Description of the failed access.
        reason: String,
    },

    /// The requested key is absent or its value has the wrong type.
    #[error("Key not found or not convertible: {key}")]
    KeyNotFound {
        /// The key that was looked up.
        key: String,
    },
}

impl HostFunctionError {
    /// Status code returned to the guest for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::InvalidHandle { .. } | Self::WrongService { .. } => -1,
            Self::MemoryAccess { .. } => -2,
            Self::KeyNotFound { .. } => -3,
        }
    }
}

/// Key/value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read the store file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A required key is absent.
    #[error("Missing required key '{key}'")]
    MissingKey { key: String },

    /// The stored value could not be converted to the requested type.
    #[error("Value '{value}' for key '{key}' cannot be converted to {target}")]
    Conversion {
        key: String,
        value: String,
        target: &'static str,
    },
}
