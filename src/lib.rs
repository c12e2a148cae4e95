//! `preloader`: amortizes dynamic-linker and libc startup cost for a
//! single ELF executable by patching its own entrypoint, at load time,
//! into a long-lived server that forks a fresh process per invocation
//! and re-enters the host's unmodified `_start` in the child.
//!
//! Built to be `LD_PRELOAD`ed ahead of the target binary: the `#[ctor]`
//! hook below runs before the host's own `main`, and before the host's
//! `_start` even gets a chance to run its first instruction.

#[macro_use]
extern crate lazy_static;

pub mod arch;
pub mod auxv;
pub mod config;
pub mod daemon;
pub mod entry;
pub mod error;
pub mod ipc;
pub mod loader;
#[macro_use]
pub mod log;
pub mod pidfile;
pub mod reaper;
pub mod signals;
pub mod stack;
pub mod state;
pub mod trampoline;

use config::Args;
use log::LogLevel;

/// Runs once, before the preloaded binary's own entrypoint, via the
/// dynamic linker's `.init_array`. Ported from `my_init` in
/// `preloader.c`: parse configuration, enforce the one-daemon-per-port
/// singleton, optionally daemonize, keep a dummy child around for the
/// reaper, load any prelisted shared objects, and finally patch the
/// host's entrypoint so normal startup lands in our accept loop instead.
#[ctor::ctor]
fn init() {
    let args = Args::get();

    if !pidfile::read_and_check_pid(&args.pid_path, args.port) {
        // Another daemon already owns this (pid_path, port); let the
        // host's own _start run completely untouched.
        return;
    }

    log::init(args.log_file.as_deref(), args.log_lvl);

    if args.daemonize {
        daemonize();
    }

    signals::spawn_dummy_child();

    if let Err(e) = pidfile::create_pid(&args.pid_path, args.port) {
        crate::die!("{}", e);
    }
    signals::install_daemon_handler();

    if let Some(path) = args.load_file.as_deref() {
        loader::load_file(path);
    }

    let auxv = match auxv::AuxvMirror::capture() {
        Ok(a) => a,
        Err(e) => crate::die!("{}", e),
    };

    let entry = match auxv.entry_point() {
        Ok(e) => e as usize,
        Err(e) => crate::die!("{}", e),
    };

    if let Err(e) = arch::make_rwx(entry, arch::STUB_LEN) {
        crate::die!("{}", e);
    }
    let patch = arch::patch(entry, trampoline::target_address());

    unsafe {
        state::install(state::DaemonState::new(args, auxv, patch));
    }

    crate::log!(LogLevel::LogInfo, "patched entrypoint at {:#x}, awaiting first launch", entry);
}

/// Classic double-fork daemonization: detach from the controlling
/// terminal and let the original process exit, so the shell that
/// launched the preloaded binary doesn't block waiting on it.
///
/// The *grandchild* is the one that falls through to patch the
/// entrypoint and eventually serve requests; `setsid` in between the
/// two forks is what actually drops the controlling terminal.
fn daemonize() {
    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
        Ok(nix::unistd::ForkResult::Child) => {}
        Err(e) => crate::die!("daemonize: first fork failed: {}", e),
    }

    if let Err(e) = nix::unistd::setsid() {
        crate::die!("daemonize: setsid failed: {}", e);
    }

    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
        Ok(nix::unistd::ForkResult::Child) => {}
        Err(e) => crate::die!("daemonize: second fork failed: {}", e),
    }
}
