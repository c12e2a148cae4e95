//! The daemon controller: the accept loop reached once the host's startup
//! lands on the patched entrypoint, and the per-request fork into the
//! child that re-enters the host's own `_start`.
//!
//! Ported from `daemon_main` (the accept loop) and `setup_child`/the
//! `fork() == 0` branch (the child path) in `preloader.c`. The state
//! machine named in the external design — `INIT -> SERVING -> FAULTED` —
//! collapses here into plain control flow: `SERVING` is simply "inside
//! the loop below", and every `FAULTED` transition is a `die!`, which
//! exits before this function could return control anywhere.

use crate::arch::{self, PatchRecord};
use crate::entry::{self, Reentry};
use crate::ipc::socket::{self, FdTriple};
use crate::ipc::{ControlRequest, Endpoint};
use crate::log::LogLevel;
use crate::reaper::Reaper;
use crate::signals;
use crate::stack::StartupStack;
use crate::state;
use crate::trampoline;
use nix::unistd::{self, ForkResult};
use std::os::unix::io::RawFd;

/// Entered exactly once, from the arch-specific trampoline, with the
/// stack pointer at the host's re-entry frame and whichever ABI register
/// the target architecture requires to survive the trip.
///
/// The process that first calls this *is* the daemon: this function never
/// returns for it, matching `daemon_main`'s `while (1)` that only ever
/// exits via a forked child's `return`. Each forked child instead falls
/// through to [`reenter_child`], which does not return to Rust at all —
/// it jumps back out through `trampoline::reenter_host`.
///
/// # Safety
/// Must only ever be called once, by `trampoline::preloader_land`,
/// immediately after the ctor hook has run to completion.
pub unsafe fn serve_from_entrypoint(sp: *mut usize, abi_reg: usize) -> ! {
    let init = state::take();

    crate::log!(LogLevel::LogInfo, "initializing...");

    let endpoint = match Endpoint::bind(&init.args.socket_path()) {
        Ok(e) => e,
        Err(e) => crate::die!("unable to start IPC: {}", e),
    };
    let reaper = Reaper::spawn();

    loop {
        let conn = match endpoint.wait_conn() {
            Ok(fd) => fd,
            Err(e) => crate::die!("failed while accepting connections, aborting: {}", e),
        };

        let (fds, body, argc) = match socket::recv_msg(conn) {
            Ok(v) => v,
            Err(e) => {
                crate::log!(LogLevel::LogInfo, "{}, skipping", e);
                socket::close_fd(conn);
                continue;
            }
        };

        let request = match ControlRequest::decode(&body, argc) {
            Ok(r) => r,
            Err(e) => {
                crate::log!(LogLevel::LogInfo, "malformed control message: {}, skipping", e);
                socket::close_fd(conn);
                continue;
            }
        };

        match unistd::fork() {
            Ok(ForkResult::Child) => {
                reenter_child(sp, abi_reg, conn, fds, request, endpoint.raw_fd(), &init.patch);
            }
            Ok(ForkResult::Parent { child }) => {
                reaper.add_child(child, conn);
                let _ = socket::send_int32(child.as_raw(), conn);
            }
            Err(e) => {
                crate::log!(LogLevel::LogCrit, "fork(2) failed: {}", e);
            }
        }
        // `fds` drops here in the parent, closing its copies; the
        // reaper now owns `conn` and will close it once the child's
        // exit status has been sent.
    }
}

/// The forked child's half of a request: close what it doesn't need,
/// install the new stdio/cwd, restore default signal handling, and
/// re-enter the host's own `_start` with the rewritten argv. Mirrors
/// `setup_child` plus the re-entry tail of `pre_daemon_main`.
///
/// # Safety
/// Must only be called in a process that just returned from `fork(2)`,
/// with `sp` pointing at the same startup frame `serve_from_entrypoint`
/// was originally invoked with.
unsafe fn reenter_child(
    sp: *mut usize,
    abi_reg: usize,
    conn: RawFd,
    fds: FdTriple,
    request: ControlRequest,
    listen_fd: RawFd,
    patch: &PatchRecord,
) -> ! {
    // The child is about to become (what looks like, to the outside
    // world) a freshly exec'd process; it shouldn't inherit a preloader
    // environment variable that only made sense for the original launch.
    std::env::remove_var("LD_BIND_NOW");

    socket::close_fd(listen_fd);
    crate::log::close();

    let _ = unistd::dup2(fds.stdin, libc::STDIN_FILENO);
    let _ = unistd::dup2(fds.stdout, libc::STDOUT_FILENO);
    let _ = unistd::dup2(fds.stderr, libc::STDERR_FILENO);
    drop(fds); // closes the now-redundant high-numbered originals
    socket::close_fd(conn);

    if let Err(e) = unistd::chdir(request.cwd.as_c_str()) {
        crate::die!("chdir({:?}) failed: {}", request.cwd, e);
    }

    signals::restore_default_in_child();

    let expected_return = patch.entry + arch::RETURN_OFFSET;
    let stack = match StartupStack::locate(sp, expected_return) {
        Some(s) => s,
        None => crate::die!(
            "unable to find the return address on the host's startup stack, aborting"
        ),
    };

    let reentry = Reentry { cwd: request.cwd, argv: request.argv };
    if let Err(e) = entry::rewrite(&stack, &reentry) {
        crate::die!("{}", e);
    }
    entry::finish(&stack, patch);

    trampoline::reenter_host(&stack, abi_reg)
}
