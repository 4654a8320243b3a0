//! Core script runtime for toolscript.
//!
//! This crate hosts embedded WebAssembly scripts inside a tool chain:
//! - [`RuntimeLifecycle`]: Starts the shared engine for the first tool, stops it after the last
//! - [`WasmEngine`]: Configured Wasmtime engine with a compiled-module cache
//! - [`ModuleResolver`]: Finds script modules on the search path
//! - [`ResolvedEntryPoints`]: The four-function contract every script satisfies
//! - [`ScriptTool`]: Drives one script through load, execute and finalise
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  RuntimeLifecycle                       │
//! │  (Process-wide, reference counted)                      │
//! │  - Starts the engine on first acquire                   │
//! │  - Stops it on last release                             │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared by all tools, thread-safe)                     │
//! │  - Fuel metering                                        │
//! │  - Compiled module cache                                │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          ScriptTool: Store<ScriptContext> + Instance    │
//! │  (One per tool, isolated)                               │
//! │  - Capability handles                                   │
//! │  - Execute / Finalise entry points                      │
//! │  - Guest logs and metrics                               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod entry;
pub mod handles;
pub mod lifecycle;
pub mod module;
pub mod script;
pub mod store;

pub use engine::WasmEngine;
pub use entry::{CallOutcome, EntryPoint, EntryPointKind, ResolvedEntryPoints};
pub use handles::{Capability, HandleTable};
pub use lifecycle::{RuntimeGuard, RuntimeLifecycle};
pub use module::{CompiledModule, ModuleResolver};
pub use script::{HostBindings, NoHostBindings, SCRIPT_KEY, ScriptTool};
pub use store::{ExecutionMetrics, LogEntry, ScriptContext};
