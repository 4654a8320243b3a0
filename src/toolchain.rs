//! Tool chain driver.
//!
//! Loads every configured tool in order, runs execute cycles over all of
//! them, then finalises them. A tool that fails to load stays in the chain;
//! its cycles are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use toolscript_common::{ConfigFile, DataModel, Logger};
use toolscript_core::{HostBindings, RuntimeLifecycle, ScriptTool};

/// Outcome of a chain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Tools whose load failed, by name.
    pub failed_loads: Vec<String>,
    /// Execute cycles completed.
    pub cycles: u64,
    /// Failed `execute` calls across all tools and cycles.
    pub execute_failures: u64,
}

impl ChainReport {
    /// Returns `true` if every tool loaded.
    pub fn all_loaded(&self) -> bool {
        self.failed_loads.is_empty()
    }
}

struct ChainTool {
    name: String,
    config: Option<std::path::PathBuf>,
    tool: ScriptTool,
}

/// An ordered set of script tools sharing one data model.
pub struct ToolChain {
    data: Arc<DataModel>,
    tools: Vec<ChainTool>,
    iterations: u64,
}

impl ToolChain {
    /// Build the tools described by `config` on `lifecycle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn new(
        config: &ConfigFile,
        lifecycle: &Arc<RuntimeLifecycle>,
        bindings: &Arc<dyn HostBindings>,
    ) -> anyhow::Result<Self> {
        let logger = Logger::new("toolchain").with_min_level(config.toolchain.log_level);
        let data = Arc::new(DataModel::new(logger));

        let tools = config
            .tools
            .iter()
            .map(|entry| {
                let tool = ScriptTool::with_lifecycle(lifecycle, Arc::clone(bindings))
                    .with_context(|| format!("Failed to create tool '{}'", entry.name))?
                    .with_execution(config.runtime.execution.clone())
                    .with_scripts(config.runtime.scripts.clone());
                Ok(ChainTool {
                    name: entry.name.clone(),
                    config: entry.config.clone(),
                    tool,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            data,
            tools,
            iterations: config.toolchain.iterations,
        })
    }

    /// Override the configured number of cycles; 0 runs until stopped.
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// The data model shared by all tools.
    pub fn data(&self) -> &Arc<DataModel> {
        &self.data
    }

    /// Load every tool; returns the names of those that failed.
    pub fn load(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for entry in &mut self.tools {
            match entry
                .tool
                .load(entry.config.as_deref(), Arc::clone(&self.data))
            {
                Ok(()) => info!(tool = %entry.name, "Tool loaded"),
                Err(e) => {
                    error!(tool = %entry.name, error = %e, "Tool failed to load, it will be skipped");
                    failed.push(entry.name.clone());
                }
            }
        }
        failed
    }

    /// Run one cycle over all tools; returns the number of failed calls.
    pub fn execute(&mut self) -> u64 {
        let mut failures = 0;
        for entry in &mut self.tools {
            if let Err(e) = entry.tool.execute() {
                warn!(tool = %entry.name, kind = %e.kind(), "Execute failed");
                failures += 1;
            }
        }
        failures
    }

    /// Finalise every tool.
    pub fn finalise(&mut self) {
        for entry in &mut self.tools {
            entry.tool.finalise();
            debug!(tool = %entry.name, "Tool finalised");
        }
    }

    /// Load, cycle until the iteration count is reached or `stop` is set,
    /// then finalise.
    pub fn run(&mut self, stop: &AtomicBool) -> ChainReport {
        let mut report = ChainReport {
            failed_loads: self.load(),
            ..Default::default()
        };

        while !stop.load(Ordering::SeqCst)
            && (self.iterations == 0 || report.cycles < self.iterations)
        {
            report.execute_failures += self.execute();
            report.cycles += 1;
        }

        self.finalise();
        info!(
            cycles = report.cycles,
            execute_failures = report.execute_failures,
            failed_loads = report.failed_loads.len(),
            "Tool chain finished"
        );
        report
    }
}
