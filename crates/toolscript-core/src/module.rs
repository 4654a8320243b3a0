//! Script module lookup and compilation.
//!
//! This module provides:
//! - [`ModuleResolver`]: Finds `<name>.wasm` / `<name>.wat` on the script search path
//! - [`CompiledModule`]: A compiled core WebAssembly module with metadata
//!
//! The search path is environmental: directories come from
//! [`ScriptConfig::search_path`] followed by those listed in `TOOLSCRIPT_PATH`.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Engine, Module};

use toolscript_common::{SCRIPT_PATH_ENV, ScriptConfig, ScriptError};

/// File extensions tried for each directory, in order.
const EXTENSIONS: [&str; 2] = ["wasm", "wat"];

/// A compiled WebAssembly script module.
///
/// `CompiledModule` is cheap to clone and can be instantiated by any number
/// of tools.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from Wasm binary or WAT text.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::CompilationFailed`] if the bytes are neither a
    /// valid binary nor valid text.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn compile(engine: &Engine, script: &str, bytes: &[u8]) -> Result<Self, ScriptError> {
        let start = Instant::now();

        if looks_binary(bytes) {
            Self::validate_wasm_header(script, bytes)?;
        }

        let module = Module::new(engine, bytes)
            .map_err(|e| ScriptError::compilation_failed(script, format!("{e:#}")))?;

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Script module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a module from WAT source.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    pub fn from_wat(engine: &Engine, script: &str, wat: &str) -> Result<Self, ScriptError> {
        Self::compile(engine, script, wat.as_bytes())
    }

    /// Get the content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    /// Names of all exports, for diagnostics.
    pub fn export_names(&self) -> Vec<String> {
        self.inner
            .exports()
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Validate a binary module's version header.
    fn validate_wasm_header(script: &str, bytes: &[u8]) -> Result<(), ScriptError> {
        if bytes.len() < 8 {
            return Err(ScriptError::compilation_failed(
                script,
                "Invalid Wasm: file too small",
            ));
        }

        if bytes[4..8] != [0x01, 0x00, 0x00, 0x00] {
            return Err(ScriptError::compilation_failed(
                script,
                "Invalid Wasm: unsupported version",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Returns `true` if the bytes start with the Wasm magic number.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\0asm")
}

/// Compute a hash of the given bytes.
pub(crate) fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Locates script modules by base name.
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver {
    search_path: Vec<PathBuf>,
}

impl ModuleResolver {
    /// Create a resolver over the given directories.
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// Create a resolver from script configuration and the environment.
    pub fn from_config(config: &ScriptConfig) -> Self {
        let mut search_path = config.search_path.clone();

        if config.use_env_path {
            if let Some(value) = std::env::var_os(SCRIPT_PATH_ENV) {
                search_path.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
            }
        }

        Self { search_path }
    }

    /// Directories searched, in order.
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Find the file for `script`.
    ///
    /// `script` must be a bare module name: no directory and no extension.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::ModuleNotFound`] if no directory holds a
    /// matching file or the name is not a bare module name.
    pub fn resolve(&self, script: &str) -> Result<PathBuf, ScriptError> {
        if !is_bare_name(script) {
            warn!(script, "Script name must not contain a directory or extension");
            return Err(ScriptError::module_not_found(script, Vec::new()));
        }

        for dir in &self.search_path {
            for ext in EXTENSIONS {
                let candidate = dir.join(format!("{script}.{ext}"));
                if candidate.is_file() {
                    debug!(script, path = %candidate.display(), "Script resolved");
                    return Ok(candidate);
                }
            }
        }

        Err(ScriptError::module_not_found(
            script,
            self.search_path.clone(),
        ))
    }
}

/// Returns `true` for names without path separators or extension dots.
fn is_bare_name(script: &str) -> bool {
    !script.is_empty()
        && !script.contains(['/', '\\', '.'])
        && Path::new(script).components().count() == 1
}
