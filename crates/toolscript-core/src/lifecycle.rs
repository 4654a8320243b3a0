//! Process-wide runtime lifetime.
//!
//! The embedded runtime is started when the first script tool is created and
//! stopped when the last one is dropped. Every tool holds a [`RuntimeGuard`];
//! the count of live guards is the number of tools sharing the runtime.
//!
//! The count and the runtime slot are updated under one lock, so a tool
//! being created on one thread cannot observe a runtime that another thread
//! is tearing down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::WasmEngine;
use toolscript_common::{EngineConfig, ScriptError};

static GLOBAL: OnceCell<Arc<RuntimeLifecycle>> = OnceCell::new();

struct Shared {
    ref_count: usize,
    engine: Option<WasmEngine>,
}

/// Reference-counted owner of the embedded runtime.
pub struct RuntimeLifecycle {
    config: EngineConfig,
    shared: Mutex<Shared>,
    starts: AtomicU64,
    stops: AtomicU64,
}

impl RuntimeLifecycle {
    /// Create a lifecycle that starts engines with `config`.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            shared: Mutex::new(Shared {
                ref_count: 0,
                engine: None,
            }),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
        })
    }

    /// The process-wide lifecycle.
    ///
    /// Uses the configuration passed to [`install_global`](Self::install_global)
    /// or the defaults if nothing was installed first.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Self::new(EngineConfig::default()))
            .clone()
    }

    /// Configure the process-wide lifecycle.
    ///
    /// Returns `false` if it was already initialized; the existing
    /// configuration is kept in that case.
    pub fn install_global(config: EngineConfig) -> bool {
        GLOBAL.set(Self::new(config)).is_ok()
    }

    /// Register one more user, starting the runtime if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started. The count is left
    /// unchanged in that case.
    pub fn acquire(self: &Arc<Self>) -> Result<RuntimeGuard, ScriptError> {
        let mut shared = self.shared.lock();

        let engine = match &shared.engine {
            Some(engine) => engine.clone(),
            None => {
                let engine = WasmEngine::new(&self.config)?;
                self.starts.fetch_add(1, Ordering::Relaxed);
                info!("Embedded runtime started");
                shared.engine = Some(engine.clone());
                engine
            }
        };

        shared.ref_count += 1;
        debug!(ref_count = shared.ref_count, "Runtime acquired");

        Ok(RuntimeGuard {
            lifecycle: Arc::clone(self),
            engine,
        })
    }

    fn release(&self) {
        let mut shared = self.shared.lock();
        shared.ref_count = shared.ref_count.saturating_sub(1);
        debug!(ref_count = shared.ref_count, "Runtime released");

        if shared.ref_count == 0 && shared.engine.take().is_some() {
            self.stops.fetch_add(1, Ordering::Relaxed);
            info!("Embedded runtime stopped");
        }
    }

    /// Number of live guards.
    pub fn ref_count(&self) -> usize {
        self.shared.lock().ref_count
    }

    /// Returns `true` while the runtime is started.
    pub fn is_live(&self) -> bool {
        self.shared.lock().engine.is_some()
    }

    /// How many times the runtime has been started.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    /// How many times the runtime has been stopped.
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RuntimeLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("RuntimeLifecycle")
            .field("ref_count", &shared.ref_count)
            .field("live", &shared.engine.is_some())
            .field("starts", &self.starts())
            .field("stops", &self.stops())
            .finish()
    }
}

/// Keeps the runtime alive; releases its share on drop.
#[derive(Debug)]
pub struct RuntimeGuard {
    lifecycle: Arc<RuntimeLifecycle>,
    engine: WasmEngine,
}

impl RuntimeGuard {
    /// The running engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// The lifecycle this guard belongs to.
    pub fn lifecycle(&self) -> &Arc<RuntimeLifecycle> {
        &self.lifecycle
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        self.lifecycle.release();
    }
}
