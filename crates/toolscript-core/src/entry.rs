//! Script entry points and the call result protocol.
//!
//! Every script exports four functions:
//!
//! | export | params | result |
//! |---|---|---|
//! | `SetToolChainVars` | `i64, i64, i64` | `i32` or `i64` |
//! | `Initialise` | none | `i32` or `i64` |
//! | `Execute` | none | `i32` or `i64` |
//! | `Finalise` | none | `i32`, `i64`, or nothing |
//!
//! A non-zero result is success, zero is a logical failure, and a trap is a
//! call fault.

use std::time::Instant;

use tracing::{debug, instrument};
use wasmtime::{Func, Instance, Store, Trap, Val, ValType};

use crate::store::{ScriptContext, get_remaining_fuel, refuel};
use toolscript_common::{ExecutionConfig, ScriptError};

/// The four entry points a script must export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPointKind {
    /// Receives the three capability handles once, before `Initialise`.
    SetToolChainVars,
    /// One-time setup.
    Initialise,
    /// Called once per cycle.
    Execute,
    /// One-time teardown.
    Finalise,
}

impl EntryPointKind {
    /// All entry points, in lifecycle order.
    pub const ALL: [EntryPointKind; 4] = [
        EntryPointKind::SetToolChainVars,
        EntryPointKind::Initialise,
        EntryPointKind::Execute,
        EntryPointKind::Finalise,
    ];

    /// Export name.
    pub fn name(self) -> &'static str {
        match self {
            EntryPointKind::SetToolChainVars => "SetToolChainVars",
            EntryPointKind::Initialise => "Initialise",
            EntryPointKind::Execute => "Execute",
            EntryPointKind::Finalise => "Finalise",
        }
    }

    /// Number of `i64` parameters the export takes.
    pub fn arity(self) -> usize {
        match self {
            EntryPointKind::SetToolChainVars => 3,
            _ => 0,
        }
    }

    /// Whether the export may return nothing.
    fn result_optional(self) -> bool {
        self == EntryPointKind::Finalise
    }
}

impl std::fmt::Display for EntryPointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a single entry point call produced.
#[derive(Debug)]
pub enum CallOutcome {
    /// Non-zero result, or no result where none is required.
    Success,

    /// The script returned zero.
    LogicalFailure,

    /// The script trapped; there is no return value.
    Fault {
        /// Description of the trap, including the guest backtrace.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },
}

impl CallOutcome {
    /// Returns `true` if the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success)
    }

    /// Convert into a typed result for `script`.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::LogicalFailure`] or [`ScriptError::CallFault`].
    pub fn into_result(self, script: &str, kind: EntryPointKind) -> Result<(), ScriptError> {
        match self {
            CallOutcome::Success => Ok(()),
            CallOutcome::LogicalFailure => Err(ScriptError::LogicalFailure {
                script: script.to_string(),
                entry_point: kind.name(),
            }),
            CallOutcome::Fault { message, code } => Err(ScriptError::CallFault {
                script: script.to_string(),
                entry_point: kind.name(),
                message,
                code,
            }),
        }
    }
}

/// An owned reference to one of a script's entry points.
///
/// Dropping it releases the reference; it is never used after that.
#[derive(Debug)]
pub struct EntryPoint {
    kind: EntryPointKind,
    func: Func,
    results: usize,
}

impl EntryPoint {
    /// Look up `kind` on `instance` and check its signature.
    ///
    /// # Errors
    ///
    /// Returns a description of why the export does not satisfy the contract.
    pub fn resolve(
        store: &mut Store<ScriptContext>,
        instance: &Instance,
        kind: EntryPointKind,
    ) -> Result<Self, String> {
        let export = instance
            .get_export(&mut *store, kind.name())
            .ok_or_else(|| format!("{kind} is missing"))?;
        let func = export
            .into_func()
            .ok_or_else(|| format!("{kind} is not callable"))?;

        let ty = func.ty(&*store);

        let params: Vec<ValType> = ty.params().collect();
        if params.len() != kind.arity() || !params.iter().all(|p| matches!(p, ValType::I64)) {
            return Err(format!(
                "{kind} must take {} i64 parameter(s), found {}",
                kind.arity(),
                params.len()
            ));
        }

        let results: Vec<ValType> = ty.results().collect();
        let results_ok = match results.as_slice() {
            [ValType::I32 | ValType::I64] => true,
            [] => kind.result_optional(),
            _ => false,
        };
        if !results_ok {
            return Err(format!("{kind} must return a single i32 or i64"));
        }

        Ok(Self {
            kind,
            func,
            results: results.len(),
        })
    }

    /// Which entry point this is.
    pub fn kind(&self) -> EntryPointKind {
        self.kind
    }

    /// Invoke the entry point with `args` on a fresh fuel budget.
    ///
    /// The returned values are inspected and dropped before returning.
    #[instrument(skip_all, fields(entry_point = %self.kind))]
    pub fn call(
        &self,
        store: &mut Store<ScriptContext>,
        args: &[Val],
        config: &ExecutionConfig,
    ) -> CallOutcome {
        if let Err(e) = refuel(store, config) {
            return CallOutcome::Fault {
                message: e.to_string(),
                code: None,
            };
        }
        let initial_fuel = get_remaining_fuel(store).unwrap_or(0);
        let start = Instant::now();

        let mut results = vec![Val::I32(0); self.results];
        let result = self.func.call(&mut *store, args, &mut results);

        let fuel = initial_fuel.saturating_sub(get_remaining_fuel(store).unwrap_or(0));
        let duration = start.elapsed();
        store.data_mut().metrics.record(fuel, duration);

        debug!(
            duration_us = duration.as_micros(),
            fuel_consumed = fuel,
            "Entry point returned"
        );

        match result {
            Err(error) => CallOutcome::Fault {
                message: format!("{error:?}"),
                code: error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}")),
            },
            Ok(()) => match results.first() {
                Some(Val::I32(0) | Val::I64(0)) => CallOutcome::LogicalFailure,
                _ => CallOutcome::Success,
            },
        }
    }
}

/// All four entry points of a script that satisfied the contract.
#[derive(Debug)]
pub struct ResolvedEntryPoints {
    /// `SetToolChainVars`.
    pub set_toolchain_vars: EntryPoint,
    /// `Initialise`.
    pub initialise: EntryPoint,
    /// `Execute`.
    pub execute: EntryPoint,
    /// `Finalise`.
    pub finalise: EntryPoint,
}

impl ResolvedEntryPoints {
    /// Resolve all four entry points or none.
    ///
    /// Every violation is reported, not only the first. Entry points that
    /// did resolve are dropped when any other fails.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::ContractViolation`] listing every problem.
    pub fn resolve(
        store: &mut Store<ScriptContext>,
        instance: &Instance,
        script: &str,
    ) -> Result<Self, ScriptError> {
        let mut problems = Vec::new();
        let resolved = EntryPointKind::ALL.map(|kind| {
            EntryPoint::resolve(store, instance, kind)
                .map_err(|problem| problems.push(problem))
                .ok()
        });

        let [
            Some(set_toolchain_vars),
            Some(initialise),
            Some(execute),
            Some(finalise),
        ] = resolved
        else {
            return Err(ScriptError::contract_violation(script, problems.join("; ")));
        };

        Ok(Self {
            set_toolchain_vars,
            initialise,
            execute,
            finalise,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use crate::module::CompiledModule;
    use crate::store::create_store;
    use toolscript_common::EngineConfig;
    use wasmtime::Linker;

    fn instantiate(wat: &str, config: &ExecutionConfig) -> (Store<ScriptContext>, Instance) {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let module = CompiledModule::from_wat(engine.inner(), "test", wat).unwrap();
        let ctx = ScriptContext::new("test", config, false);
        let mut store = create_store(&engine, config, ctx).unwrap();
        let linker = Linker::new(engine.inner());
        let instance = linker.instantiate(&mut store, module.as_module()).unwrap();
        (store, instance)
    }

    const FULL: &str = r#"
        (module
            (func (export "SetToolChainVars") (param i64 i64 i64) (result i32) i32.const 1)
            (func (export "Initialise") (result i32) i32.const 1)
            (func (export "Execute") (result i64) i64.const 0)
            (func (export "Finalise"))
        )
    "#;

    #[test]
    fn test_entry_point_names() {
        let names: Vec<_> = EntryPointKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec!["SetToolChainVars", "Initialise", "Execute", "Finalise"]
        );
        assert_eq!(EntryPointKind::SetToolChainVars.arity(), 3);
    }

    #[test]
    fn test_resolve_full_contract() {
        let config = ExecutionConfig::default();
        let (mut store, instance) = instantiate(FULL, &config);

        let resolved = ResolvedEntryPoints::resolve(&mut store, &instance, "test").unwrap();
        assert_eq!(resolved.execute.kind(), EntryPointKind::Execute);
    }

    #[test]
    fn test_resolve_reports_every_problem() {
        let wat = r#"
            (module
                (global (export "Initialise") i32 (i32.const 1))
                (func (export "Execute") (param i32) (result i32) i32.const 1)
                (func (export "Finalise") (result i32) i32.const 1)
            )
        "#;
        let config = ExecutionConfig::default();
        let (mut store, instance) = instantiate(wat, &config);

        let err = ResolvedEntryPoints::resolve(&mut store, &instance, "broken").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("broken"));
        assert!(message.contains("SetToolChainVars is missing"));
        assert!(message.contains("Initialise is not callable"));
        assert!(message.contains("Execute must take 0"));
    }

    #[test]
    fn test_result_required_except_finalise() {
        let wat = r#"(module (func (export "Execute")))"#;
        let config = ExecutionConfig::default();
        let (mut store, instance) = instantiate(wat, &config);

        let err = EntryPoint::resolve(&mut store, &instance, EntryPointKind::Execute).unwrap_err();
        assert!(err.contains("single i32 or i64"));
    }

    #[test]
    fn test_call_outcomes() {
        let config = ExecutionConfig::default();
        let (mut store, instance) = instantiate(FULL, &config);
        let resolved = ResolvedEntryPoints::resolve(&mut store, &instance, "test").unwrap();

        let args = [Val::I64(1), Val::I64(2), Val::I64(3)];
        assert!(
            resolved
                .set_toolchain_vars
                .call(&mut store, &args, &config)
                .is_success()
        );
        assert!(matches!(
            resolved.execute.call(&mut store, &[], &config),
            CallOutcome::LogicalFailure
        ));
        assert!(resolved.finalise.call(&mut store, &[], &config).is_success());
        assert_eq!(store.data().metrics.calls, 3);
    }

    #[test]
    fn test_call_trap_and_fuel() {
        let wat = r#"
            (module
                (func (export "Execute") (result i32) unreachable)
                (func (export "Initialise") (result i32)
                    (loop $forever (br $forever))
                    i32.const 1)
            )
        "#;
        let config = ExecutionConfig {
            max_fuel: 1_000,
            ..Default::default()
        };
        let (mut store, instance) = instantiate(wat, &config);

        let execute = EntryPoint::resolve(&mut store, &instance, EntryPointKind::Execute).unwrap();
        match execute.call(&mut store, &[], &config) {
            CallOutcome::Fault { code, .. } => {
                assert_eq!(code.as_deref(), Some("UnreachableCodeReached"));
            }
            other => panic!("expected fault, got {other:?}"),
        }

        let spin = EntryPoint::resolve(&mut store, &instance, EntryPointKind::Initialise).unwrap();
        match spin.call(&mut store, &[], &config) {
            CallOutcome::Fault { code, .. } => assert_eq!(code.as_deref(), Some("OutOfFuel")),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn test_into_result() {
        assert!(CallOutcome::Success
            .into_result("s", EntryPointKind::Execute)
            .is_ok());

        let err = CallOutcome::LogicalFailure
            .into_result("s", EntryPointKind::Initialise)
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::LogicalFailure { entry_point: "Initialise", .. }
        ));
    }
}
