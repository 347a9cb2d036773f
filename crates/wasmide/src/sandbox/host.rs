//! Substitute standard facilities
//!
//! Host functions behind the `sandbox/system` and `sandbox/scanner` import
//! modules. They are the only functions a program's linker can resolve, and
//! they talk to the world exclusively through the current thread's
//! [`IoContext`](crate::sandbox::io::IoContext).

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use wasmtime::{Caller, Extern, Linker, Memory};

use crate::config::Facilities;
use crate::sandbox::io;
use crate::sandbox::{HostFault, SandboxState};

/// Name of the linear memory export guest strings live in
pub const MEMORY_EXPORT: &str = "memory";

/// Functions provided under the substitute output module
pub const SYSTEM_FUNCTIONS: &[&str] = &[
    "print",
    "println",
    "print_i32",
    "print_i64",
    "print_f64",
    "print_char",
    "newline",
    "eprint",
    "eprintln",
    "exit",
    "fail",
    "current_time_millis",
];

/// Functions provided under the substitute input module
pub const SCANNER_FUNCTIONS: &[&str] = &[
    "has_next",
    "has_next_i32",
    "has_next_line",
    "next_i32",
    "next_i64",
    "next_f64",
    "next",
    "next_line",
    "read_byte",
];

/// Define every substitute function in `linker`
pub fn define_substitutes(
    linker: &mut Linker<SandboxState>,
    facilities: &Facilities,
) -> Result<()> {
    define_system(linker, facilities.system.substitute.as_str())?;
    define_scanner(linker, facilities.scanner.substitute.as_str())?;
    Ok(())
}

fn define_system(linker: &mut Linker<SandboxState>, module: &str) -> Result<()> {
    linker.func_wrap(
        module,
        "print",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| -> Result<()> {
            let text = read_guest(&mut caller, ptr, len)?;
            write_out(&text)
        },
    )?;
    linker.func_wrap(
        module,
        "println",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| -> Result<()> {
            let mut text = read_guest(&mut caller, ptr, len)?;
            text.push(b'\n');
            write_out(&text)
        },
    )?;
    linker.func_wrap(module, "print_i32", |value: i32| -> Result<()> {
        write_out(value.to_string().as_bytes())
    })?;
    linker.func_wrap(module, "print_i64", |value: i64| -> Result<()> {
        write_out(value.to_string().as_bytes())
    })?;
    linker.func_wrap(module, "print_f64", |value: f64| -> Result<()> {
        write_out(format!("{value:?}").as_bytes())
    })?;
    linker.func_wrap(module, "print_char", |code: i32| -> Result<()> {
        let c = u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut buf = [0u8; 4];
        write_out(c.encode_utf8(&mut buf).as_bytes())
    })?;
    linker.func_wrap(module, "newline", || -> Result<()> { write_out(b"\n") })?;

    // The error stream shares the captured output.
    linker.func_wrap(
        module,
        "eprint",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| -> Result<()> {
            let text = read_guest(&mut caller, ptr, len)?;
            write_out(&text)
        },
    )?;
    linker.func_wrap(
        module,
        "eprintln",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| -> Result<()> {
            let mut text = read_guest(&mut caller, ptr, len)?;
            text.push(b'\n');
            write_out(&text)
        },
    )?;

    linker.func_wrap(module, "exit", |status: i32| -> Result<()> {
        Err(HostFault::Exit(status).into())
    })?;
    linker.func_wrap(
        module,
        "fail",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| -> Result<()> {
            let message = read_guest(&mut caller, ptr, len)?;
            Err(HostFault::Raised(String::from_utf8_lossy(&message).into_owned()).into())
        },
    )?;
    linker.func_wrap(module, "current_time_millis", || -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    })?;

    Ok(())
}

fn define_scanner(linker: &mut Linker<SandboxState>, module: &str) -> Result<()> {
    linker.func_wrap(module, "has_next", || -> Result<i32> {
        Ok(io::with_current(|context| Ok(context.input().has_next()))?.into())
    })?;
    linker.func_wrap(module, "has_next_i32", || -> Result<i32> {
        Ok(io::with_current(|context| Ok(context.input().has_next_parsed::<i32>()))?.into())
    })?;
    linker.func_wrap(module, "has_next_line", || -> Result<i32> {
        Ok(io::with_current(|context| Ok(context.input().has_next_line()))?.into())
    })?;
    linker.func_wrap(module, "next_i32", || -> Result<i32> {
        Ok(io::with_current(|context| context.input().next_parsed("i32"))?)
    })?;
    linker.func_wrap(module, "next_i64", || -> Result<i64> {
        Ok(io::with_current(|context| context.input().next_parsed("i64"))?)
    })?;
    linker.func_wrap(module, "next_f64", || -> Result<f64> {
        Ok(io::with_current(|context| context.input().next_parsed("f64"))?)
    })?;
    linker.func_wrap(
        module,
        "next",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, cap: i32| -> Result<i32> {
            let token = io::with_current(|context| {
                context.input().next_token().ok_or(HostFault::NoSuchElement)
            })?;
            write_guest(&mut caller, ptr, cap, &token)?;
            Ok(guest_len(token.len()))
        },
    )?;
    linker.func_wrap(
        module,
        "next_line",
        |mut caller: Caller<'_, SandboxState>, ptr: i32, cap: i32| -> Result<i32> {
            let line = io::with_current(|context| {
                context.input().next_line().ok_or(HostFault::NoLineFound)
            })?;
            write_guest(&mut caller, ptr, cap, &line)?;
            Ok(guest_len(line.len()))
        },
    )?;
    linker.func_wrap(module, "read_byte", || -> Result<i32> {
        let byte = io::with_current(|context| Ok(context.input().read_byte()))?;
        Ok(byte.map_or(-1, i32::from))
    })?;

    Ok(())
}

fn write_out(bytes: &[u8]) -> Result<()> {
    Ok(io::with_current(|context| context.write(bytes))?)
}

fn guest_memory(caller: &mut Caller<'_, SandboxState>) -> Result<Memory, HostFault> {
    match caller.get_export(MEMORY_EXPORT) {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(HostFault::MissingMemory),
    }
}

/// Copy `len` bytes at `ptr` out of guest memory
fn read_guest(
    caller: &mut Caller<'_, SandboxState>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostFault> {
    let memory = guest_memory(caller)?;
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len as u32 as usize)
        .ok_or(HostFault::OutOfBounds)?;
    memory
        .data(&*caller)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or(HostFault::OutOfBounds)
}

/// Copy at most `cap` bytes of `bytes` into guest memory at `ptr`
fn write_guest(
    caller: &mut Caller<'_, SandboxState>,
    ptr: i32,
    cap: i32,
    bytes: &[u8],
) -> Result<(), HostFault> {
    let memory = guest_memory(caller)?;
    let count = bytes.len().min(cap.max(0) as usize);
    memory
        .write(&mut *caller, ptr as u32 as usize, &bytes[..count])
        .map_err(|_| HostFault::OutOfBounds)
}

fn guest_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}
