//! Host functions implementation for toolscript.
//!
//! Scripts reach the host only through the capability handles they receive
//! in `SetToolChainVars`. This crate implements the functions those handles
//! unlock.
//!
//! # Interfaces
//!
//! - [`logging`]: Logging through the chain logger
//! - [`linker`]: Registration of the `env` functions for the logger, the
//!   tool's config store and the shared data model
//! - [`memory`]: Bounds-checked guest memory access
//!
//! [`StandardHost`] bundles all of them, plus optional WASI, as the
//! [`HostBindings`] a [`ScriptTool`](toolscript_core::ScriptTool) links
//! scripts against.

pub mod linker;
pub mod logging;
pub mod memory;

pub use logging::LoggingHost;

use toolscript_common::ScriptError;
use toolscript_core::{HostBindings, ScriptContext};
use wasmtime::Linker;

/// The standard set of host functions.
#[derive(Debug, Clone, Copy)]
pub struct StandardHost {
    wasi: bool,
}

impl Default for StandardHost {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardHost {
    /// Host functions plus WASI preview1.
    pub fn new() -> Self {
        Self { wasi: true }
    }

    /// Host functions only; scripts importing WASI fail to load.
    pub fn without_wasi() -> Self {
        Self { wasi: false }
    }

    /// Returns `true` if WASI is linked.
    pub fn has_wasi(&self) -> bool {
        self.wasi
    }
}

impl HostBindings for StandardHost {
    fn register(&self, linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
        if self.wasi {
            linker::register_wasi(linker)?;
        }
        linker::register_all(linker)
    }
}
