//! Host function registration for Wasmtime linkers.
//!
//! All functions live in the `env` module, take a capability handle as their
//! first argument and return an `i32` status. Negative statuses are errors:
//!
//! | status | meaning |
//! |---|---|
//! | `-1` | unknown handle, or a handle for another service |
//! | `-2` | guest memory access out of bounds, or invalid UTF-8 |
//! | `-3` | key not found, or value not convertible |

use std::sync::Arc;

use tracing::warn;
use wasmtime::{Caller, Linker};

use toolscript_common::{HostFunctionError, LogLevel, ScriptError};
use toolscript_core::ScriptContext;

use crate::logging::LoggingHost;
use crate::memory::{read_str, write_i64, write_truncated};

/// Register all standard host functions on a core module linker.
///
/// This registers:
/// - `env::log`
/// - `env::config_get_i64`, `env::config_get_str`
/// - `env::data_get_i64`, `env::data_set_i64`, `env::data_get_str`, `env::data_set_str`
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
    register_logging(linker)?;
    register_config(linker)?;
    register_data(linker)?;
    Ok(())
}

/// Register WASI preview1 so scripts built for `wasm32-wasip1` link.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_wasi(linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, ScriptContext::wasi_mut)
        .map_err(|e| registration_failed("wasi", &e))
}

/// Register the logging host function.
///
/// `env::log(logger: i64, level: i32, ptr: i32, len: i32) -> i32` emits the
/// UTF-8 message at `ptr` (0=debug, 1=info, 2=warn, 3=error). Returns `1` if
/// the message passed the verbosity threshold and `0` if it was filtered.
pub fn register_logging(linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, ScriptContext>, handle: i64, level: i32, ptr: i32, len: i32| {
                let result = host_log(&mut caller, handle, level, ptr, len);
                status(&caller, "log", result)
            },
        )
        .map_err(|e| registration_failed("log", &e))?;

    Ok(())
}

fn host_log(
    caller: &mut Caller<'_, ScriptContext>,
    handle: i64,
    level: i32,
    ptr: i32,
    len: i32,
) -> Result<i32, HostFunctionError> {
    let logger = caller.data().handles().logger(handle)?.clone();
    let message = read_str(caller, ptr, len)?;
    let emitted = LoggingHost::log(caller.data_mut(), &logger, LogLevel::from_i32(level), &message);
    Ok(i32::from(emitted))
}

/// Register the config store host functions.
///
/// - `env::config_get_i64(config: i64, kptr: i32, klen: i32, out: i32) -> i32`
///   writes the value as a little-endian `i64` at `out`.
/// - `env::config_get_str(config: i64, kptr: i32, klen: i32, buf: i32, cap: i32) -> i32`
///   copies at most `cap` bytes into `buf` and returns the full length.
pub fn register_config(linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
    linker
        .func_wrap(
            "env",
            "config_get_i64",
            |mut caller: Caller<'_, ScriptContext>, handle: i64, kptr: i32, klen: i32, out: i32| {
                let result = config_get_i64(&mut caller, handle, kptr, klen, out);
                status(&caller, "config_get_i64", result)
            },
        )
        .map_err(|e| registration_failed("config_get_i64", &e))?;

    linker
        .func_wrap(
            "env",
            "config_get_str",
            |mut caller: Caller<'_, ScriptContext>,
             handle: i64,
             kptr: i32,
             klen: i32,
             buf: i32,
             cap: i32| {
                let result = config_get_str(&mut caller, handle, kptr, klen, buf, cap);
                status(&caller, "config_get_str", result)
            },
        )
        .map_err(|e| registration_failed("config_get_str", &e))?;

    Ok(())
}

fn config_get_i64(
    caller: &mut Caller<'_, ScriptContext>,
    handle: i64,
    kptr: i32,
    klen: i32,
    out: i32,
) -> Result<i32, HostFunctionError> {
    let store = Arc::clone(caller.data().handles().config(handle)?);
    let key = read_str(caller, kptr, klen)?;
    let value = store
        .read()
        .get::<i64>(&key)
        .map_err(|_| HostFunctionError::KeyNotFound { key })?;
    write_i64(caller, out, value)?;
    Ok(0)
}

fn config_get_str(
    caller: &mut Caller<'_, ScriptContext>,
    handle: i64,
    kptr: i32,
    klen: i32,
    buf: i32,
    cap: i32,
) -> Result<i32, HostFunctionError> {
    let store = Arc::clone(caller.data().handles().config(handle)?);
    let key = read_str(caller, kptr, klen)?;
    let value = store
        .read()
        .get_str(&key)
        .map(str::to_string)
        .ok_or(HostFunctionError::KeyNotFound { key })?;
    write_truncated(caller, buf, cap, value.as_bytes())
}

/// Register the data model host functions.
///
/// Getters follow the config store conventions. Setters:
/// - `env::data_set_i64(data: i64, kptr: i32, klen: i32, value: i64) -> i32`
/// - `env::data_set_str(data: i64, kptr: i32, klen: i32, vptr: i32, vlen: i32) -> i32`
pub fn register_data(linker: &mut Linker<ScriptContext>) -> Result<(), ScriptError> {
    linker
        .func_wrap(
            "env",
            "data_get_i64",
            |mut caller: Caller<'_, ScriptContext>, handle: i64, kptr: i32, klen: i32, out: i32| {
                let result = data_get_i64(&mut caller, handle, kptr, klen, out);
                status(&caller, "data_get_i64", result)
            },
        )
        .map_err(|e| registration_failed("data_get_i64", &e))?;

    linker
        .func_wrap(
            "env",
            "data_set_i64",
            |mut caller: Caller<'_, ScriptContext>, handle: i64, kptr: i32, klen: i32, value: i64| {
                let result = data_set(&mut caller, handle, kptr, klen, |_| Ok(value.to_string()));
                status(&caller, "data_set_i64", result)
            },
        )
        .map_err(|e| registration_failed("data_set_i64", &e))?;

    linker
        .func_wrap(
            "env",
            "data_get_str",
            |mut caller: Caller<'_, ScriptContext>,
             handle: i64,
             kptr: i32,
             klen: i32,
             buf: i32,
             cap: i32| {
                let result = data_get_str(&mut caller, handle, kptr, klen, buf, cap);
                status(&caller, "data_get_str", result)
            },
        )
        .map_err(|e| registration_failed("data_get_str", &e))?;

    linker
        .func_wrap(
            "env",
            "data_set_str",
            |mut caller: Caller<'_, ScriptContext>,
             handle: i64,
             kptr: i32,
             klen: i32,
             vptr: i32,
             vlen: i32| {
                let result = data_set(&mut caller, handle, kptr, klen, |caller| {
                    read_str(caller, vptr, vlen)
                });
                status(&caller, "data_set_str", result)
            },
        )
        .map_err(|e| registration_failed("data_set_str", &e))?;

    Ok(())
}

fn data_get_i64(
    caller: &mut Caller<'_, ScriptContext>,
    handle: i64,
    kptr: i32,
    klen: i32,
    out: i32,
) -> Result<i32, HostFunctionError> {
    let data = Arc::clone(caller.data().handles().data_model(handle)?);
    let key = read_str(caller, kptr, klen)?;
    let value = data
        .get::<i64>(&key)
        .ok_or(HostFunctionError::KeyNotFound { key })?;
    write_i64(caller, out, value)?;
    Ok(0)
}

fn data_get_str(
    caller: &mut Caller<'_, ScriptContext>,
    handle: i64,
    kptr: i32,
    klen: i32,
    buf: i32,
    cap: i32,
) -> Result<i32, HostFunctionError> {
    let data = Arc::clone(caller.data().handles().data_model(handle)?);
    let key = read_str(caller, kptr, klen)?;
    let value = data
        .get_str(&key)
        .ok_or(HostFunctionError::KeyNotFound { key })?;
    write_truncated(caller, buf, cap, value.as_bytes())
}

fn data_set(
    caller: &mut Caller<'_, ScriptContext>,
    handle: i64,
    kptr: i32,
    klen: i32,
    value: impl FnOnce(&mut Caller<'_, ScriptContext>) -> Result<String, HostFunctionError>,
) -> Result<i32, HostFunctionError> {
    let data = Arc::clone(caller.data().handles().data_model(handle)?);
    let key = read_str(caller, kptr, klen)?;
    let value = value(caller)?;
    data.set(key, value);
    Ok(0)
}

/// Turn a host function result into the status returned to the guest.
fn status(caller: &Caller<'_, ScriptContext>, function: &str, result: Result<i32, HostFunctionError>) -> i32 {
    result.unwrap_or_else(|e| {
        warn!(
            script = %caller.data().script,
            function,
            error = %e,
            "Host function failed"
        );
        e.status_code()
    })
}

fn registration_failed(function: &str, error: &wasmtime::Error) -> ScriptError {
    ScriptError::invalid_config(format!("Failed to register {function} function: {error}"))
}
