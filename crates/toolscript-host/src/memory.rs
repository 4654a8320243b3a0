//! Guest memory access for host functions.
//!
//! Guests pass strings and output slots as `(ptr, len)` pairs into their
//! exported `memory`. Every access is bounds checked; a bad pair is reported
//! to the guest as a status code, never as a trap.

use std::ops::Range;

use toolscript_common::HostFunctionError;
use toolscript_core::ScriptContext;
use wasmtime::{Caller, Extern, Memory};

/// Validate `(ptr, len)` against a memory of `size` bytes.
///
/// # Errors
///
/// Returns [`HostFunctionError::MemoryAccess`] for negative values, overflow,
/// or a range past the end of memory.
pub fn guest_range(ptr: i32, len: i32, size: usize) -> Result<Range<usize>, HostFunctionError> {
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return Err(memory_error(format!(
            "negative pointer or length ({ptr}, {len})"
        )));
    };

    let end = start
        .checked_add(len)
        .ok_or_else(|| memory_error(format!("pointer + length overflow ({ptr}, {len})")))?;

    if end > size {
        return Err(memory_error(format!(
            "range {start}..{end} exceeds memory size {size}"
        )));
    }

    Ok(start..end)
}

/// The guest's exported linear memory.
pub fn guest_memory(caller: &mut Caller<'_, ScriptContext>) -> Result<Memory, HostFunctionError> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| memory_error("guest exports no memory"))
}

/// Copy `len` bytes at `ptr` out of guest memory.
pub fn read_bytes(
    caller: &mut Caller<'_, ScriptContext>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostFunctionError> {
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let range = guest_range(ptr, len, data.len())?;
    Ok(data[range].to_vec())
}

/// Read a UTF-8 string from guest memory.
pub fn read_str(
    caller: &mut Caller<'_, ScriptContext>,
    ptr: i32,
    len: i32,
) -> Result<String, HostFunctionError> {
    String::from_utf8(read_bytes(caller, ptr, len)?)
        .map_err(|e| memory_error(format!("invalid UTF-8: {e}")))
}

/// Write `bytes` into guest memory at `ptr`.
pub fn write_bytes(
    caller: &mut Caller<'_, ScriptContext>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), HostFunctionError> {
    let memory = guest_memory(caller)?;
    let len = i32::try_from(bytes.len()).map_err(|_| memory_error("value too large"))?;
    let range = guest_range(ptr, len, memory.data_size(&*caller))?;
    memory.data_mut(&mut *caller)[range].copy_from_slice(bytes);
    Ok(())
}

/// Write a little-endian `i64` into guest memory at `ptr`.
pub fn write_i64(
    caller: &mut Caller<'_, ScriptContext>,
    ptr: i32,
    value: i64,
) -> Result<(), HostFunctionError> {
    write_bytes(caller, ptr, &value.to_le_bytes())
}

/// Copy as much of `value` as fits in the guest buffer `(buf, cap)`.
///
/// Returns the full length of `value` so the guest can detect truncation.
pub fn write_truncated(
    caller: &mut Caller<'_, ScriptContext>,
    buf: i32,
    cap: i32,
    value: &[u8],
) -> Result<i32, HostFunctionError> {
    let cap = usize::try_from(cap).map_err(|_| memory_error(format!("negative capacity {cap}")))?;
    let copied = value.len().min(cap);
    write_bytes(caller, buf, &value[..copied])?;
    Ok(i32::try_from(value.len()).unwrap_or(i32::MAX))
}

fn memory_error(reason: impl Into<String>) -> HostFunctionError {
    HostFunctionError::MemoryAccess {
        reason: reason.into(),
    }
}
