//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the embedded runtime every script tool runs on. It is:
//! - Thread-safe and shared by every tool in the process
//! - Set up with fuel metering so runaway scripts trap instead of hanging
//! - The owner of the compiled-module cache, so tools loading the same
//!   script compile it once

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, OptLevel, PoolingAllocationConfig};

use toolscript_common::{EngineConfig, ScriptError};

use crate::module::{CompiledModule, compute_hash};

/// Thread-safe WebAssembly engine wrapper.
///
/// Created by the [`RuntimeLifecycle`](crate::RuntimeLifecycle) when the first
/// tool is constructed and dropped with the last one.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Fuel Metering**: Every entry point call runs on a fresh fuel budget
/// - **Pooling Allocator** (optional): Pre-allocates instance memory
/// - **Cranelift**: Optimized for speed unless `optimize` is off
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    modules: Arc<DashMap<String, CompiledModule>>,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    pub fn new(config: &EngineConfig) -> Result<Self, ScriptError> {
        let mut wasmtime_config = Config::new();

        // Fuel is always consumed; unmetered calls get an unbounded budget
        wasmtime_config.consume_fuel(true);

        wasmtime_config.cranelift_opt_level(if config.optimize {
            OptLevel::Speed
        } else {
            OptLevel::None
        });

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            ScriptError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!("Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            modules: Arc::new(DashMap::new()),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }

    /// Read and compile a script file, reusing a cached compilation of
    /// identical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::CompilationFailed`] if the file cannot be read
    /// or does not compile.
    pub fn load_module(&self, script: &str, path: &Path) -> Result<CompiledModule, ScriptError> {
        let bytes = std::fs::read(path).map_err(|e| {
            ScriptError::compilation_failed(
                script,
                format!("Cannot read {}: {e}", path.display()),
            )
        })?;

        let hash = compute_hash(&bytes);
        if let Some(cached) = self.modules.get(&hash) {
            debug!(script, content_hash = %hash, "Using cached module");
            return Ok(cached.clone());
        }

        let compiled = CompiledModule::compile(self.inner(), script, &bytes)?;
        self.modules.insert(hash, compiled.clone());
        Ok(compiled)
    }

    /// Number of distinct modules compiled by this engine.
    pub fn cached_modules(&self) -> usize {
        self.modules.len()
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("optimize", &self.config.optimize)
            .field("cached_modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}
