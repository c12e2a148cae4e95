//! The record threading ctor-time state into the daemon's request loop.
//!
//! Replaces the C original's file-scope globals (`struct args args`,
//! `bck_start`/`addr_start`) with one value, built once by the `ctor` init
//! hook and consumed exactly once by [`crate::daemon::serve_from_entrypoint`]
//! — the patched entrypoint calls back into the process with no way to pass
//! a pointer through the CPU's own call mechanism, so a single `install`/
//! `take` pair around a process-wide slot is the only channel available.
//! Everything that only matters once the request loop is actually running
//! (the IPC endpoint, the reaper) is constructed locally inside that loop
//! instead of living here, since nothing outside it ever needs to reach
//! them.

use crate::arch::PatchRecord;
use crate::auxv::AuxvMirror;
use crate::config::Args;

pub struct DaemonState {
    pub args: &'static Args,
    pub auxv: AuxvMirror,
    pub patch: PatchRecord,
}

impl DaemonState {
    pub fn new(args: &'static Args, auxv: AuxvMirror, patch: PatchRecord) -> DaemonState {
        DaemonState { args, auxv, patch }
    }
}

static mut STATE: Option<DaemonState> = None;

/// Stashes the ctor-time state for `daemon::serve_from_entrypoint` to pick
/// up. Must be called at most once, before the patched entrypoint can
/// possibly be reached.
///
/// # Safety
/// Must only be called from the single-threaded ctor hook, before the
/// entrypoint patch is installed.
pub unsafe fn install(state: DaemonState) {
    STATE = Some(state);
}

/// Consumes the stashed state. Panics if called more than once or before
/// `install` — both would indicate the entrypoint was reached without a
/// completed ctor, which is an unrecoverable ABI-integrity violation.
///
/// # Safety
/// Must only be called once, by `daemon::serve_from_entrypoint`.
pub unsafe fn take() -> DaemonState {
    STATE.take().expect("daemon entrypoint reached without a completed ctor")
}
