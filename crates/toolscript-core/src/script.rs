//! The script tool: drives one embedded script through its lifecycle.
//!
//! ```text
//! new ──► load ──► execute ×N ──► finalise ──► drop
//!  │        │          │              │          │
//!  │        │          │              │          └ runtime released
//!  │        │          │              └ Finalise called, module dropped
//!  │        │          └ Execute called; a fault unloads the script
//!  │        └ config, module, contract, SetToolChainVars, Initialise
//!  └ runtime acquired
//! ```
//!
//! Failures fall into three tiers. A failed `load` leaves nothing loaded.
//! A falsy `Execute` is reported and the script stays loaded. A trap in
//! `Execute` unloads the script and later cycles are skipped. `finalise`
//! never fails.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Instance, Linker, Store, Val};

use crate::engine::WasmEngine;
use crate::entry::{CallOutcome, EntryPoint, EntryPointKind, ResolvedEntryPoints};
use crate::handles::{HandleTable, encode_handle};
use crate::lifecycle::{RuntimeGuard, RuntimeLifecycle};
use crate::module::ModuleResolver;
use crate::store::{ExecutionMetrics, LogEntry, ScriptContext, create_store};
use toolscript_common::{
    DataModel, ExecutionConfig, ScriptConfig, ScriptError, SharedStore, Store as ConfigStore,
};

/// Configuration key naming the script module.
pub const SCRIPT_KEY: &str = "PythonScript";

/// Host functions made available to scripts.
///
/// Implementations add their imports to the linker each time a script is
/// instantiated.
pub trait HostBindings: Send + Sync {
    /// Register host functions on `linker`.
    ///
    /// # Errors
    ///
    /// Returns an error if a function cannot be defined.
    fn register(&self, linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError>;
}

/// Registers nothing. Scripts with imports fail to instantiate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHostBindings;

impl HostBindings for NoHostBindings {
    fn register(&self, _linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
        Ok(())
    }
}

static NO_LOGS: VecDeque<LogEntry> = VecDeque::new();

/// An instantiated script and the store it lives in.
struct LoadedScript {
    store: Store<ScriptContext>,
    instance: Instance,
}

/// Host wrapper around one embedded script.
///
/// Field order matters: entry points are dropped before the module, and the
/// module before the runtime guard.
pub struct ScriptTool {
    script: Option<String>,
    variables: SharedStore,
    execution: ExecutionConfig,
    scripts: ScriptConfig,
    bindings: Arc<dyn HostBindings>,
    handle_base: Option<u64>,

    execute: Option<EntryPoint>,
    finalise: Option<EntryPoint>,
    module: Option<LoadedScript>,

    runtime: RuntimeGuard,
}

impl ScriptTool {
    /// Create a tool on the process-wide runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn new(bindings: Arc<dyn HostBindings>) -> Result<Self, ScriptError> {
        Self::with_lifecycle(&RuntimeLifecycle::global(), bindings)
    }

    /// Create a tool on an explicit runtime lifecycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn with_lifecycle(
        lifecycle: &Arc<RuntimeLifecycle>,
        bindings: Arc<dyn HostBindings>,
    ) -> Result<Self, ScriptError> {
        let runtime = lifecycle.acquire()?;

        Ok(Self {
            script: None,
            variables: ConfigStore::new().into_shared(),
            execution: ExecutionConfig::default(),
            scripts: ScriptConfig::default(),
            bindings,
            handle_base: None,
            execute: None,
            finalise: None,
            module: None,
            runtime,
        })
    }

    /// Set per-call resource limits.
    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Set where scripts are looked up.
    pub fn with_scripts(mut self, scripts: ScriptConfig) -> Self {
        self.scripts = scripts;
        self
    }

    /// Use `variables` as the tool's configuration store.
    pub fn with_variables(mut self, variables: SharedStore) -> Self {
        self.variables = variables;
        self
    }

    /// Pin the first capability handle granted at bootstrap.
    #[doc(hidden)]
    pub fn with_handle_base(mut self, base: u64) -> Self {
        self.handle_base = Some(base);
        self
    }

    /// Load the script named in the configuration and run its bootstrap.
    ///
    /// Reads `config_path` (if present and non-empty) into the tool's
    /// configuration store, looks up [`SCRIPT_KEY`], instantiates the module,
    /// checks the entry point contract, hands the script its three capability
    /// handles through `SetToolChainVars` and calls `Initialise`.
    ///
    /// On any failure nothing stays loaded and later calls to
    /// [`execute`](Self::execute) do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::AlreadyLoaded`] if a script is loaded, or the
    /// error of the failing step.
    #[instrument(skip_all, fields(phase = "load", config = ?config_path))]
    pub fn load(
        &mut self,
        config_path: Option<&Path>,
        data: Arc<DataModel>,
    ) -> Result<(), ScriptError> {
        if self.is_loaded() {
            return Err(ScriptError::AlreadyLoaded {
                script: self.script.clone().unwrap_or_default(),
            });
        }

        match self.try_load(config_path, data) {
            Ok((module, execute, finalise)) => {
                info!(script = ?self.script, "Script loaded");
                self.module = Some(module);
                self.execute = Some(execute);
                self.finalise = Some(finalise);
                Ok(())
            }
            Err(e) => {
                error!(script = ?self.script, kind = %e.kind(), error = %e, "Script load failed");
                Err(e)
            }
        }
    }

    fn try_load(
        &mut self,
        config_path: Option<&Path>,
        data: Arc<DataModel>,
    ) -> Result<(LoadedScript, EntryPoint, EntryPoint), ScriptError> {
        if let Some(path) = config_path.filter(|p| !p.as_os_str().is_empty()) {
            let parsed = ConfigStore::from_file(path)?;
            self.variables.write().merge(parsed);
        }

        let script: String = self.variables.read().get(SCRIPT_KEY)?;
        self.script = Some(script.clone());

        let engine = self.runtime.engine();
        let path = ModuleResolver::from_config(&self.scripts).resolve(&script)?;
        let compiled = engine.load_module(&script, &path)?;

        let mut module = self.instantiate(engine, &script, compiled.as_module())?;

        let ResolvedEntryPoints {
            set_toolchain_vars,
            initialise,
            execute,
            finalise,
        } = ResolvedEntryPoints::resolve(&mut module.store, &module.instance, &script)?;

        let handles = module
            .store
            .data_mut()
            .grant_bootstrap(data, Arc::clone(&self.variables));
        let args = marshal_handles(&script, handles)?;

        let outcome = set_toolchain_vars.call(&mut module.store, &args, &self.execution);
        drop(args);
        drop(set_toolchain_vars);
        outcome.into_result(&script, EntryPointKind::SetToolChainVars)?;
        debug!(script, "Bootstrap handles delivered");

        let outcome = initialise.call(&mut module.store, &[], &self.execution);
        drop(initialise);
        outcome.into_result(&script, EntryPointKind::Initialise)?;

        Ok((module, execute, finalise))
    }

    fn instantiate(
        &self,
        engine: &WasmEngine,
        script: &str,
        module: &wasmtime::Module,
    ) -> Result<LoadedScript, ScriptError> {
        let mut linker = Linker::new(engine.inner());
        self.bindings.register(&mut linker)?;

        let mut context = ScriptContext::new(script, &self.execution, self.scripts.inherit_stdio);
        if let Some(base) = self.handle_base {
            context = context.with_handles(HandleTable::with_base(base));
        }

        let mut store = create_store(engine, &self.execution, context)?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| ScriptError::compilation_failed(script, format!("{e:#}")))?;

        Ok(LoadedScript { store, instance })
    }

    /// Run one cycle of the script.
    ///
    /// Does nothing if no script is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::LogicalFailure`] if `Execute` returned zero;
    /// the script stays loaded. Returns [`ScriptError::CallFault`] if it
    /// trapped; the script is unloaded.
    #[instrument(skip_all, fields(phase = "execute"))]
    pub fn execute(&mut self) -> Result<(), ScriptError> {
        let (Some(entry), Some(module)) = (&self.execute, &mut self.module) else {
            return Ok(());
        };
        let script = module.store.data().script.clone();

        match entry.call(&mut module.store, &[], &self.execution) {
            CallOutcome::Success => Ok(()),
            outcome @ CallOutcome::LogicalFailure => {
                warn!(script, entry_point = "Execute", "Script reported failure");
                outcome.into_result(&script, EntryPointKind::Execute)
            }
            outcome @ CallOutcome::Fault { .. } => {
                let result = outcome.into_result(&script, EntryPointKind::Execute);
                if let Err(e) = &result {
                    error!(script, entry_point = "Execute", error = %e, "Script faulted, unloading");
                }
                self.unload();
                result
            }
        }
    }

    /// Call the script's `Finalise` and unload it.
    ///
    /// Safe to call before `load`, after a failed `load`, and more than
    /// once. Failures inside `Finalise` are logged only.
    #[instrument(skip_all, fields(phase = "finalise"))]
    pub fn finalise(&mut self) -> bool {
        let Some(mut module) = self.module.take() else {
            self.unload();
            return true;
        };
        let script = module.store.data().script.clone();

        if let Some(entry) = self.finalise.take() {
            match entry.call(&mut module.store, &[], &self.execution) {
                CallOutcome::Success => debug!(script, "Script finalised"),
                CallOutcome::LogicalFailure => {
                    warn!(script, entry_point = "Finalise", "Script reported failure");
                }
                CallOutcome::Fault { message, .. } => {
                    error!(script, entry_point = "Finalise", error = %message, "Script faulted");
                }
            }
        }

        self.unload();
        module.store.data_mut().handles_mut().revoke_all();
        drop(module);
        info!(script, "Script unloaded");
        true
    }

    fn unload(&mut self) {
        self.execute = None;
        self.finalise = None;
        self.module = None;
    }

    /// Returns `true` while a script is loaded.
    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    /// Number of entry points currently held.
    pub fn retained_entry_points(&self) -> usize {
        usize::from(self.execute.is_some()) + usize::from(self.finalise.is_some())
    }

    /// The script name read from the configuration, if any.
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// The tool's configuration store, shared with the script.
    pub fn variables(&self) -> &SharedStore {
        &self.variables
    }

    /// Most recent log lines emitted by the loaded script, oldest first.
    ///
    /// At most [`ExecutionConfig::max_guest_logs`] lines are kept.
    pub fn guest_logs(&self) -> &VecDeque<LogEntry> {
        self.module
            .as_ref()
            .map_or(&NO_LOGS, |module| &module.store.data().logs)
    }

    /// Call metrics of the loaded script.
    pub fn metrics(&self) -> Option<&ExecutionMetrics> {
        self.module.as_ref().map(|module| &module.store.data().metrics)
    }

    /// The runtime this tool keeps alive.
    pub fn runtime(&self) -> &RuntimeGuard {
        &self.runtime
    }
}

impl std::fmt::Debug for ScriptTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptTool")
            .field("script", &self.script)
            .field("loaded", &self.is_loaded())
            .field("retained_entry_points", &self.retained_entry_points())
            .finish_non_exhaustive()
    }
}

/// Encode the bootstrap handles into the `SetToolChainVars` argument list.
fn marshal_handles(script: &str, handles: [u64; 3]) -> Result<Vec<Val>, ScriptError> {
    handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| {
            encode_handle(handle)
                .map(Val::I64)
                .map_err(|raw| ScriptError::MarshalFailed {
                    script: script.to_string(),
                    index,
                    reason: format!("handle {raw} does not fit in a 64-bit signed integer"),
                })
        })
        .collect()
}
