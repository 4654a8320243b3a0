//! Per-script execution context and store management.
//!
//! This module provides:
//! - [`ScriptContext`]: Per-instance state accessible from host functions
//! - [`LogEntry`]: A log line emitted by guest code
//! - [`ExecutionMetrics`]: Fuel and timing of entry point calls

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::handles::{Capability, HandleTable};
use toolscript_common::{DataModel, ExecutionConfig, LogLevel, ScriptError, SharedStore};

/// Per-instance execution context.
///
/// One context lives inside the [`Store`] of every loaded script and is
/// dropped with it. Host functions reach it through [`wasmtime::Caller`].
pub struct ScriptContext {
    /// WASI preview1 context (stdio only).
    wasi: WasiP1Ctx,

    /// Memory limits for this instance.
    limits: StoreLimits,

    /// Capabilities granted to the script.
    handles: HandleTable,

    /// Script base name.
    pub script: String,

    /// Unique identifier for log correlation.
    pub instance_id: String,

    /// Most recent log lines from guest code, oldest first.
    pub logs: VecDeque<LogEntry>,

    /// Capacity of `logs`.
    max_logs: usize,

    /// Entry point call metrics.
    pub metrics: ExecutionMetrics,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Entry point call metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Number of entry point calls made.
    pub calls: u64,

    /// Fuel consumed by the most recent call.
    pub fuel_consumed: u64,

    /// Fuel consumed by all calls.
    pub total_fuel: u64,

    /// Duration of the most recent call.
    pub last_duration: Option<Duration>,
}

impl ExecutionMetrics {
    /// Record one finished call.
    pub fn record(&mut self, fuel: u64, duration: Duration) {
        self.calls += 1;
        self.fuel_consumed = fuel;
        self.total_fuel = self.total_fuel.saturating_add(fuel);
        self.last_duration = Some(duration);
    }
}

impl ScriptContext {
    /// Create a new context for `script`.
    pub fn new(script: impl Into<String>, config: &ExecutionConfig, inherit_stdio: bool) -> Self {
        let mut builder = WasiCtxBuilder::new();
        if inherit_stdio {
            builder.inherit_stdout().inherit_stderr();
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();

        Self {
            wasi: builder.build_p1(),
            limits,
            handles: HandleTable::new(),
            script: script.into(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            logs: VecDeque::new(),
            max_logs: config.max_guest_logs,
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Replace the handle table, e.g. to pin handle values.
    pub fn with_handles(mut self, handles: HandleTable) -> Self {
        self.handles = handles;
        self
    }

    /// Grant the bootstrap capabilities in contract order:
    /// data model, config store, logger.
    pub fn grant_bootstrap(&mut self, data: Arc<DataModel>, variables: SharedStore) -> [u64; 3] {
        let logger = data.logger().clone();
        [
            self.handles.grant(Capability::DataModel(data)),
            self.handles.grant(Capability::Config(variables)),
            self.handles.grant(Capability::Logger(logger)),
        ]
    }

    /// Capabilities granted to the script.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Mutable access to the granted capabilities.
    pub fn handles_mut(&mut self) -> &mut HandleTable {
        &mut self.handles
    }

    /// WASI context for host linking.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Add a log entry, dropping the oldest once the buffer is full.
    pub fn log(&mut self, level: LogLevel, message: String) {
        if self.max_logs == 0 {
            return;
        }
        while self.logs.len() >= self.max_logs {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }
}

/// Fuel budget for calls when metering is disabled (wasmtime stores fuel as `i64`).
pub const UNMETERED_FUEL: u64 = i64::MAX as u64;

/// Create a new Wasmtime store around `context`.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: ScriptContext,
) -> Result<Store<ScriptContext>, ScriptError> {
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);
    refuel(&mut store, config)?;
    Ok(store)
}

/// Reset the fuel budget before an entry point call.
///
/// # Errors
///
/// Returns an error if the engine does not meter fuel.
pub fn refuel(store: &mut Store<ScriptContext>, config: &ExecutionConfig) -> Result<(), ScriptError> {
    let budget = if config.fuel_metering {
        config.max_fuel
    } else {
        UNMETERED_FUEL
    };

    store
        .set_fuel(budget)
        .map_err(|e| ScriptError::invalid_config(format!("Failed to set fuel: {e}")))
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<ScriptContext>) -> Option<u64> {
    store.get_fuel().ok()
}
