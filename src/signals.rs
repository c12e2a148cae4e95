//! SIGTERM handling for the daemon and its children.
//!
//! Ported from `sig_handler`/`daemonize`'s dummy-child comment in
//! `preloader.c`. The handler is deliberately one-shot and heavy-handed:
//! it resets itself to the default disposition and then broadcasts
//! SIGTERM to the whole process group, which is the only way to reliably
//! take down both the daemon and the dummy child kept alive purely so the
//! reaper always has something to `wait()` on.

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;

extern "C" fn handle_sigterm(_: libc::c_int) {
    unsafe {
        let _ = signal::signal(Signal::SIGTERM, SigHandler::SigDfl);
    }
    // `kill(2)` with pid 0 targets the caller's whole process group —
    // the dummy child included — without needing `killpg`'s extra arg.
    let _ = signal::kill(Pid::from_raw(0), Signal::SIGTERM);
}

/// Installs the daemon's one-shot SIGTERM handler.
pub fn install_daemon_handler() {
    unsafe {
        signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_sigterm))
            .expect("installing SIGTERM handler");
    }
}

/// Restores the default disposition for every signal a freshly `exec`'d
/// process would have, run in the forked child right before it re-enters
/// the host's `_start`. Mirrors `setup_child`'s `signal(SIGTERM, SIG_DFL)`.
pub fn restore_default_in_child() {
    unsafe {
        let _ = signal::signal(Signal::SIGTERM, SigHandler::SigDfl);
    }
}

/// Forks a process that immediately `pause()`s forever, purely so the
/// reaper thread's blocking `wait(2)` always has at least one child to
/// wait for — without it, a daemon that hasn't served any requests yet
/// would have `wait()` return `ECHILD` instead of blocking. Mirrors the
/// unnamed `if (!fork()) pause();` in `my_init`.
pub fn spawn_dummy_child() {
    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Child) => loop {
            nix::unistd::pause();
        },
        Ok(nix::unistd::ForkResult::Parent { .. }) => {}
        Err(e) => crate::die!("unable to spawn dummy child: {}", e),
    }
}
