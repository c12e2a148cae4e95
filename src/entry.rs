//! The entrypoint re-entry engine: the part of the system that turns a
//! patched `_start` back into a freshly-`exec`'d process, running inside
//! whichever forked child the daemon controller hands it a request for.
//!
//! This is the direct port of `pre_daemon_main` in `preloader.c` /
//! `arch.c`: locate the return address the patched stub pushed, rewrite
//! `argc`/`argv`/`envp`/`auxv` in place, restore the original entrypoint
//! bytes, and fix up the return address so the host's own `_start` runs
//! from the beginning as if nothing had happened.

use crate::arch::{self, PatchRecord};
use crate::error::{PreloaderError, Result};
use crate::stack::StartupStack;
use std::ffi::CString;

/// Everything the trampoline needs once it has located the host's stack
/// frame: the new command line and working directory to install before
/// falling through to the host's original `_start`.
pub struct Reentry {
    pub cwd: CString,
    pub argv: Vec<CString>,
}

/// Rewrites `argc`, `argv`, shifts `envp`/`auxv` left to close the gap, and
/// points the process-wide `environ` at the shifted block.
///
/// Always performed (never skipped) — the naive non-shifting variant shown
/// in an earlier prototype left argv's old trailing bytes where `envp`
/// expected to start, which only happened to work because that prototype's
/// libc located environment variables another way. Shifting is the only
/// form that holds regardless of libc internals.
///
/// # Safety
/// `stack` must be anchored at the real return-address slot of the host's
/// own startup frame, as produced by `StartupStack::locate`.
pub unsafe fn rewrite(stack: &StartupStack, reentry: &Reentry) -> Result<()> {
    let argc = reentry.argv.len();
    let host_argc = stack.argc();
    if host_argc < argc {
        return Err(PreloaderError::AbiIntegrity(format!(
            "host argc ({}) is less than required argc ({}); relaunch with a longer command line",
            host_argc, argc
        )));
    }
    stack.set_argc(argc);

    for (i, arg) in reentry.argv.iter().enumerate() {
        stack.set_argv(i, arg.as_ptr() as *const u8);
    }
    // NULL-terminate argv.
    *(stack.argv_slot(argc) as *mut *const u8) = std::ptr::null();

    // `host_argc` must be captured above, before `set_argc` overwrote the
    // stack's own argc slot with the new, shorter count: it's the only
    // record of where envp actually starts in the host's original layout.
    shift_envp_and_auxv(stack, argc, host_argc);

    Ok(())
}

/// Slides everything after the (now shorter) argv block left by the
/// number of slots the new argv freed up, then repoints `environ`.
///
/// Ported from `arch_change_argv` in `arch.c`. The source scans forward
/// from just past the new argv's terminating NULL to find where the old,
/// longer argv block used to end, and copies everything from there
/// (envp and auxv, which sit contiguously above argv on the stack) down
/// to directly follow the new argv.
unsafe fn shift_envp_and_auxv(stack: &StartupStack, new_argc: usize, host_argc: usize) {
    let dest_start = stack.argv_slot(new_argc + 1);

    // `environ` must point at the destination before the shift begins:
    // once the copy starts overwriting old envp pointers in place, the
    // only stable reference to "where envp will end up" is this one,
    // taken up front. `dest_start` already *is* where envp[0] will land
    // (it's the slot right after argv's new NULL terminator), so environ
    // points there directly, not one word past it.
    extern "C" {
        static mut environ: *mut *mut libc::c_char;
    }
    environ = dest_start as *mut *mut libc::c_char;

    // `src` walks the original, longer argv's tail to find where envp
    // used to start: the slot immediately after the old argv's NULL. Must
    // use the host's original argc, captured by the caller before
    // `set_argc` overwrote the stack's own slot — `stack.argc()` would
    // read back `new_argc` at this point, not the host's.
    let mut src = stack.argv_slot(host_argc + 1);
    let mut dest = dest_start;

    loop {
        *dest = *src;
        if *src == 0 {
            break;
        }
        src = src.add(1);
        dest = dest.add(1);
    }
    // Continue past envp's terminator through the auxv array until its
    // own AT_NULL terminator (two words: type, value) is copied.
    loop {
        let a_type = *src.add(1);
        *dest = *src;
        *dest.add(1) = *src.add(1);
        if a_type == libc::AT_NULL as usize {
            break;
        }
        src = src.add(2);
        dest = dest.add(2);
    }
}

/// Restores the original entrypoint bytes and adjusts the return address
/// so the host resumes executing its own, un-patched `_start`.
///
/// # Safety
/// Must run on the same stack frame `rewrite` used, after `rewrite` has
/// completed successfully.
pub unsafe fn finish(stack: &StartupStack, record: &PatchRecord) {
    let delta = arch::restore(record);
    stack.adjust_return_address(delta);
}
