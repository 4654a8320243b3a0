//! toolscript CLI entry point.
//!
//! Runs a tool chain of WebAssembly script tools described by a TOML file.

mod toolchain;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolscript_common::ConfigFile;
use toolscript_core::{HostBindings, RuntimeLifecycle};
use toolscript_host::StandardHost;

use crate::toolchain::ToolChain;

/// Log output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Run a chain of script tools.
#[derive(Debug, Parser)]
#[command(name = "toolscript", version, about)]
struct Args {
    /// Tool chain configuration file (TOML).
    #[arg(env = "TOOLSCRIPT_CONFIG")]
    config: PathBuf,

    /// Execute cycles to run; 0 runs until interrupted. Overrides the file.
    #[arg(short, long, env = "TOOLSCRIPT_ITERATIONS")]
    iterations: Option<u64>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "TOOLSCRIPT_LOG_FORMAT")]
    log_format: LogFormat,

    /// Do not link WASI into scripts.
    #[arg(long)]
    no_wasi: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,toolscript=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!(config = %args.config.display(), "Starting toolscript");

    let config = ConfigFile::from_file(&args.config)
        .with_context(|| format!("Cannot load tool chain file {}", args.config.display()))?;
    let iterations = args.iterations.unwrap_or(config.toolchain.iterations);

    if !RuntimeLifecycle::install_global(config.runtime.engine.clone()) {
        warn!("Runtime already configured, engine settings ignored");
    }
    let lifecycle = RuntimeLifecycle::global();

    let bindings: Arc<dyn HostBindings> = if args.no_wasi {
        Arc::new(StandardHost::without_wasi())
    } else {
        Arc::new(StandardHost::new())
    };

    info!(tools = config.tools.len(), iterations, "Configuration loaded");

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current cycle");
            signal_stop.store(true, Ordering::SeqCst);
        }
    });

    let chain_lifecycle = Arc::clone(&lifecycle);
    let report = tokio::task::spawn_blocking(move || {
        let mut chain = ToolChain::new(&config, &chain_lifecycle, &bindings)?
            .with_iterations(iterations);
        anyhow::Ok(chain.run(&stop))
    })
    .await
    .context("Tool chain task panicked")??;

    info!(
        runtime_starts = lifecycle.starts(),
        runtime_stops = lifecycle.stops(),
        "Runtime shut down"
    );

    if !report.all_loaded() {
        anyhow::bail!(
            "{} tool(s) failed to load: {}",
            report.failed_loads.len(),
            report.failed_loads.join(", ")
        );
    }

    Ok(())
}
