//! Lifecycle tests for toolscript-core.
//!
//! These tests drive real scripts through the tool lifecycle:
//! - Runtime start/stop across several tools
//! - Contract checking and load unwinding
//! - The three failure tiers of `execute`
//! - Idempotent `finalise`

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

use toolscript_common::{
    DataModel, EngineConfig, ErrorKind, ExecutionConfig, ScriptConfig, ScriptError,
};
use toolscript_core::{
    HostBindings, NoHostBindings, RuntimeLifecycle, SCRIPT_KEY, ScriptContext, ScriptTool,
};
use wasmtime::Linker;

/// Provides `env.tick`, which counts how often scripts call it.
#[derive(Default)]
struct Ticker {
    ticks: AtomicUsize,
}

impl Ticker {
    fn count(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

struct TickBindings(Arc<Ticker>);

impl HostBindings for TickBindings {
    fn register(&self, linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
        let ticker = Arc::clone(&self.0);
        linker
            .func_wrap("env", "tick", move || {
                ticker.ticks.fetch_add(1, Ordering::SeqCst);
            })
            .map_err(|e| ScriptError::invalid_config(e.to_string()))?;
        Ok(())
    }
}

/// Build a script whose entry points tick and then return the given values.
fn script(set_vars: i32, initialise: i32, execute_body: &str, finalise_body: &str) -> String {
    format!(
        r#"
        (module
            (import "env" "tick" (func $tick))
            (global $calls (mut i32) (i32.const 0))
            (func (export "SetToolChainVars") (param i64 i64 i64) (result i32)
                i32.const {set_vars})
            (func (export "Initialise") (result i32)
                i32.const {initialise})
            (func (export "Execute") (result i32)
                call $tick
                (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
                {execute_body})
            (func (export "Finalise") (result i32)
                call $tick
                {finalise_body})
        )
        "#
    )
}

fn ok_script() -> String {
    script(1, 1, "i32.const 1", "i32.const 1")
}

struct Fixture {
    dir: tempfile::TempDir,
    lifecycle: Arc<RuntimeLifecycle>,
    ticker: Arc<Ticker>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            lifecycle: RuntimeLifecycle::new(EngineConfig::default()),
            ticker: Arc::new(Ticker::default()),
        }
    }

    fn write(&self, name: &str, wat: &str) {
        std::fs::write(self.dir.path().join(format!("{name}.wat")), wat).unwrap();
    }

    fn tool(&self, name: &str) -> ScriptTool {
        self.tool_with(name, ExecutionConfig::default())
    }

    fn tool_with(&self, name: &str, execution: ExecutionConfig) -> ScriptTool {
        let tool = ScriptTool::with_lifecycle(
            &self.lifecycle,
            Arc::new(TickBindings(Arc::clone(&self.ticker))),
        )
        .unwrap()
        .with_scripts(ScriptConfig::with_search_path([self.dir.path()]))
        .with_execution(execution);
        tool.variables().write().set(SCRIPT_KEY, name);
        tool
    }

    fn load(&self, name: &str) -> (ScriptTool, Result<(), ScriptError>) {
        let mut tool = self.tool(name);
        let result = tool.load(None, Arc::new(DataModel::default()));
        (tool, result)
    }
}

// ============================================================================
// Test: Runtime Lifecycle
// ============================================================================

#[test]
fn test_runtime_started_once_for_many_tools() {
    let fixture = Fixture::new();
    fixture.write("Counter", &ok_script());

    let mut tools: Vec<_> = (0..3)
        .map(|_| {
            let (tool, result) = fixture.load("Counter");
            result.unwrap();
            tool
        })
        .collect();

    assert_eq!(fixture.lifecycle.starts(), 1);
    assert_eq!(fixture.lifecycle.ref_count(), 3);

    for tool in &mut tools {
        tool.execute().unwrap();
        assert!(tool.finalise());
    }
    drop(tools.pop());
    assert!(fixture.lifecycle.is_live());
    assert_eq!(fixture.lifecycle.stops(), 0);

    drop(tools);
    assert!(!fixture.lifecycle.is_live());
    assert_eq!(fixture.lifecycle.starts(), 1);
    assert_eq!(fixture.lifecycle.stops(), 1);
}

#[test]
fn test_failed_load_still_releases_runtime() {
    let fixture = Fixture::new();
    let (tool, result) = fixture.load("Missing");

    assert!(result.is_err());
    assert_eq!(fixture.lifecycle.ref_count(), 1);
    drop(tool);
    assert_eq!(fixture.lifecycle.ref_count(), 0);
    assert_eq!(fixture.lifecycle.stops(), 1);
}

// ============================================================================
// Test: Load Failures
// ============================================================================

#[test]
fn test_missing_script_key() {
    let fixture = Fixture::new();
    let mut tool = ScriptTool::with_lifecycle(&fixture.lifecycle, Arc::new(NoHostBindings)).unwrap();

    let err = tool.load(None, Arc::new(DataModel::default())).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains(SCRIPT_KEY));
    assert!(!tool.is_loaded());
}

#[test]
fn test_module_not_found() {
    let fixture = Fixture::new();
    let (mut tool, result) = fixture.load("Nowhere");

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadNotFound);
    assert!(err.is_not_found());
    assert_eq!(tool.retained_entry_points(), 0);
    assert!(tool.execute().is_ok());
}

#[test]
fn test_module_does_not_compile() {
    let fixture = Fixture::new();
    fixture.write("Broken", "(module (func");

    let (tool, result) = fixture.load("Broken");

    let err = result.unwrap_err();
    assert!(matches!(err, ScriptError::CompilationFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::LoadNotFound);
    assert!(!tool.is_loaded());
}

#[test]
fn test_unresolved_import_fails_load() {
    let fixture = Fixture::new();
    fixture.write("Needy", &ok_script());

    let mut tool = ScriptTool::with_lifecycle(&fixture.lifecycle, Arc::new(NoHostBindings))
        .unwrap()
        .with_scripts(ScriptConfig::with_search_path([fixture.dir.path()]));
    tool.variables().write().set(SCRIPT_KEY, "Needy");

    let err = tool.load(None, Arc::new(DataModel::default())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadNotFound);
}

#[test]
fn test_missing_entry_point_unwinds_everything() {
    let fixture = Fixture::new();
    fixture.write(
        "NoExecute",
        r#"
        (module
            (func (export "SetToolChainVars") (param i64 i64 i64) (result i32) i32.const 1)
            (func (export "Initialise") (result i32) i32.const 1)
            (func (export "Finalise") (result i32) i32.const 1)
        )
        "#,
    );

    let (mut tool, result) = fixture.load("NoExecute");

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    assert!(err.to_string().contains("NoExecute"));
    assert!(err.to_string().contains("Execute is missing"));
    assert!(!tool.is_loaded());
    assert_eq!(tool.retained_entry_points(), 0);
    assert!(tool.execute().is_ok());
}

#[test]
fn test_wrong_signature_is_contract_violation() {
    let fixture = Fixture::new();
    fixture.write(
        "Shapes",
        r#"
        (module
            (func (export "SetToolChainVars") (param i32 i32 i32) (result i32) i32.const 1)
            (func (export "Initialise") (result i32) i32.const 1)
            (func (export "Execute") (result f32) f32.const 1)
            (func (export "Finalise"))
        )
        "#,
    );

    let (_tool, result) = fixture.load("Shapes");

    let message = result.unwrap_err().to_string();
    assert!(message.contains("SetToolChainVars must take 3 i64"));
    assert!(message.contains("Execute must return"));
    assert!(!message.contains("Finalise"));
}

#[test]
fn test_falsy_set_toolchain_vars_fails_load() {
    let fixture = Fixture::new();
    fixture.write("Refuses", &script(0, 1, "i32.const 1", "i32.const 1"));

    let (mut tool, result) = fixture.load("Refuses");

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        ScriptError::LogicalFailure {
            entry_point: "SetToolChainVars",
            ..
        }
    ));
    assert!(!tool.is_loaded());
    assert_eq!(tool.retained_entry_points(), 0);

    tool.execute().unwrap();
    assert_eq!(fixture.ticker.count(), 0, "Execute must not run after a failed load");
}

#[test]
fn test_falsy_initialise_fails_load() {
    let fixture = Fixture::new();
    fixture.write("NoInit", &script(1, 0, "i32.const 1", "i32.const 1"));

    let (mut tool, result) = fixture.load("NoInit");

    assert!(matches!(
        result.unwrap_err(),
        ScriptError::LogicalFailure {
            entry_point: "Initialise",
            ..
        }
    ));
    assert!(tool.finalise());
    assert_eq!(fixture.ticker.count(), 0, "Finalise must not run after a failed load");
}

#[test]
fn test_load_from_config_file() {
    let fixture = Fixture::new();
    fixture.write("FromFile", &ok_script());
    let config = fixture.dir.path().join("ToolConfig");
    std::fs::write(&config, "# tool config\nPythonScript FromFile\nverbosity 3\n").unwrap();

    let mut tool = fixture.tool("Placeholder");
    tool.load(Some(&config), Arc::new(DataModel::default()))
        .unwrap();

    assert_eq!(tool.script(), Some("FromFile"));
    assert_eq!(tool.variables().read().get::<i32>("verbosity").unwrap(), 3);
}

#[test]
fn test_empty_config_path_uses_existing_store() {
    let fixture = Fixture::new();
    fixture.write("Defaults", &ok_script());
    let mut tool = fixture.tool("Defaults");

    tool.load(Some(Path::new("")), Arc::new(DataModel::default()))
        .unwrap();

    assert!(tool.is_loaded());
    assert_eq!(tool.script(), Some("Defaults"));
}

#[test]
fn test_unreadable_config_file() {
    let fixture = Fixture::new();
    let mut tool = fixture.tool("Anything");

    let err = tool
        .load(
            Some(Path::new("/no/such/config")),
            Arc::new(DataModel::default()),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

// ============================================================================
// Test: Execute Tiers
// ============================================================================

#[test]
fn test_logical_failure_keeps_script_loaded() {
    let fixture = Fixture::new();
    // Fails on the first cycle only.
    fixture.write(
        "Flaky",
        &script(
            1,
            1,
            "(i32.gt_u (global.get $calls) (i32.const 1))",
            "i32.const 1",
        ),
    );

    let (mut tool, result) = fixture.load("Flaky");
    result.unwrap();

    let err = tool.execute().unwrap_err();
    assert!(err.is_recoverable());
    assert!(tool.is_loaded());
    assert_eq!(tool.retained_entry_points(), 2);

    tool.execute().unwrap();
    assert_eq!(fixture.ticker.count(), 2);
}

#[test]
fn test_fault_unloads_script() {
    let fixture = Fixture::new();
    fixture.write("Crashes", &script(1, 1, "unreachable", "i32.const 1"));

    let (mut tool, result) = fixture.load("Crashes");
    result.unwrap();

    let err = tool.execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallFault);
    if let ScriptError::CallFault { entry_point, code, .. } = &err {
        assert_eq!(*entry_point, "Execute");
        assert_eq!(code.as_deref(), Some("UnreachableCodeReached"));
    }
    assert!(!tool.is_loaded());
    assert_eq!(tool.retained_entry_points(), 0);

    tool.execute().unwrap();
    tool.execute().unwrap();
    assert_eq!(fixture.ticker.count(), 1, "Execute must not run after a fault");

    assert!(tool.finalise());
    assert_eq!(fixture.ticker.count(), 1, "Finalise must not run after a fault");
}

#[test]
fn test_out_of_fuel_is_fault() {
    let fixture = Fixture::new();
    fixture.write(
        "Spins",
        &script(1, 1, "(loop $spin (br $spin)) i32.const 1", "i32.const 1"),
    );

    let mut tool = fixture.tool_with(
        "Spins",
        ExecutionConfig {
            max_fuel: 10_000,
            ..Default::default()
        },
    );
    tool.load(None, Arc::new(DataModel::default())).unwrap();

    let err = tool.execute().unwrap_err();
    assert!(matches!(
        err,
        ScriptError::CallFault { ref code, .. } if code.as_deref() == Some("OutOfFuel")
    ));
    assert!(!tool.is_loaded());
}

#[test]
fn test_fuel_refilled_every_cycle() {
    let fixture = Fixture::new();
    fixture.write("Busy", &ok_script());

    let mut tool = fixture.tool_with(
        "Busy",
        ExecutionConfig {
            max_fuel: 500,
            ..Default::default()
        },
    );
    tool.load(None, Arc::new(DataModel::default())).unwrap();

    for _ in 0..50 {
        tool.execute().unwrap();
    }
    let metrics = tool.metrics().unwrap();
    assert_eq!(metrics.calls, 52);
    assert!(metrics.fuel_consumed > 0);
}

// ============================================================================
// Test: Finalise
// ============================================================================

#[test]
fn test_finalise_is_idempotent() {
    let fixture = Fixture::new();
    fixture.write("Once", &ok_script());

    let mut unloaded = fixture.tool("Once");
    assert!(unloaded.finalise());

    let (mut tool, result) = fixture.load("Once");
    result.unwrap();

    assert!(tool.finalise());
    assert!(tool.finalise());
    assert_eq!(fixture.ticker.count(), 1, "Finalise must run exactly once");
    assert!(!tool.is_loaded());
    assert!(tool.execute().is_ok());
}

#[test]
fn test_finalise_failures_are_only_logged() {
    let fixture = Fixture::new();
    fixture.write("BadExit", &script(1, 1, "i32.const 1", "unreachable"));
    fixture.write("SadExit", &script(1, 1, "i32.const 1", "i32.const 0"));

    for name in ["BadExit", "SadExit"] {
        let (mut tool, result) = fixture.load(name);
        result.unwrap();

        assert!(tool.finalise());
        assert!(!tool.is_loaded());
        assert_eq!(tool.retained_entry_points(), 0);
    }
}

/// Text of the `message` and `error` fields of one event.
#[derive(Debug, Default)]
struct EventText {
    message: String,
    error: Option<String>,
}

impl Visit for EventText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "error" => self.error = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

/// Collects error-level events.
#[derive(Clone, Default)]
struct ErrorEvents(Arc<Mutex<Vec<EventText>>>);

impl<S: tracing::Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            let mut text = EventText::default();
            event.record(&mut text);
            self.0.lock().push(text);
        }
    }
}

#[test]
fn test_finalise_fault_reports_trap_text() {
    let fixture = Fixture::new();
    fixture.write("BadExit", &script(1, 1, "i32.const 1", "unreachable"));
    let (mut tool, result) = fixture.load("BadExit");
    result.unwrap();

    let events = ErrorEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    assert!(tracing::subscriber::with_default(subscriber, || tool.finalise()));

    let events = events.0.lock();
    let fault = events
        .iter()
        .find(|e| e.message == "Script faulted")
        .expect("fault event");
    assert!(fault.error.as_deref().unwrap().contains("unreachable"));
}

#[test]
fn test_finalise_without_result_succeeds() {
    let fixture = Fixture::new();
    fixture.write(
        "Quiet",
        r#"
        (module
            (import "env" "tick" (func $tick))
            (func (export "SetToolChainVars") (param i64 i64 i64) (result i64) i64.const 9)
            (func (export "Initialise") (result i64) i64.const -1)
            (func (export "Execute") (result i32) i32.const 1)
            (func (export "Finalise") call $tick)
        )
        "#,
    );

    let (mut tool, result) = fixture.load("Quiet");
    result.unwrap();

    assert!(tool.finalise());
    assert_eq!(fixture.ticker.count(), 1);
}
