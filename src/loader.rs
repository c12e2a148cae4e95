//! Optional bulk `dlopen` of a newline-separated list of shared objects,
//! run once before the daemon starts serving so their resolution cost is
//! paid up front instead of on the first request that needs them.
//!
//! Ported from `load_file` in `load.c`. Using `libloading` instead of raw
//! `libc::dlopen` FFI matches the wider example pack's preference for a
//! safe-ish wrapper over hand-rolled dynamic-loading unsafety wherever one
//! is available.

use crate::log::LogLevel;
use std::fs;

/// Reads `path`, one shared-object path per line, and `dlopen`s each with
/// `RTLD_NOW` binding. A failed `dlopen` is logged and otherwise ignored —
/// there is nothing a caller could usefully do about a library that
/// refuses to resolve.
///
/// Every successfully opened `Library` is deliberately leaked: there's no
/// defined point at which it would be safe to unload (the host process
/// may still hold pointers into it once it starts running user code), so
/// matching `load_file`'s own comment, "everything is expected to die
/// along with the process."
pub fn load_file(path: &str) {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            crate::die!("unable to read load file {}: {}", path, e);
        }
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // `libloading`'s unix-specific constructor takes raw dlopen flags
        // directly, letting us ask for RTLD_NOW the way `load_file` does,
        // rather than relying on the portable API's default flags.
        match unsafe { libloading::os::unix::Library::open(Some(line), libc::RTLD_NOW) } {
            Ok(lib) => std::mem::forget(lib),
            Err(e) => {
                crate::log!(LogLevel::LogInfo, "unable to dlopen lib: {}\nr: {}", line, e);
            }
        }
    }
}
