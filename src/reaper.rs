//! The dedicated reaper thread: waits for forked children to die,
//! translates their exit status into the shell convention, and relays it
//! on the connection the client is still blocked reading from.
//!
//! Ported from `reaper.c`. A background thread calling `wait(2)` in a
//! loop is used instead of a `SIGCHLD` handler because the daemon's main
//! thread is mid-syscall (`accept`, `recv`) most of the time it's alive;
//! an async-signal interrupting those would corrupt in-flight state far
//! more than the cost of one dedicated thread.

use crate::error::PreloaderError;
use crate::ipc::socket;
use crate::log::LogLevel;
use nix::sys::wait::{wait, WaitStatus};
use nix::unistd::Pid;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const PAUSE: Duration = Duration::from_millis(20);
const INITIAL_CAPACITY: usize = 16;

#[derive(Clone, Copy)]
struct ChildRecord {
    pid: Pid,
    /// `-1` marks a free slot, matching the original's sentinel.
    fd: RawFd,
}

struct ChildTable {
    records: Vec<ChildRecord>,
    last_empty: usize,
}

impl ChildTable {
    fn new() -> ChildTable {
        ChildTable {
            records: vec![ChildRecord { pid: Pid::from_raw(0), fd: -1 }; INITIAL_CAPACITY],
            last_empty: 0,
        }
    }

    /// Inserts at `last_empty` if that slot is still free (the common,
    /// O(1) case), otherwise linear-scans, otherwise doubles capacity.
    /// Mirrors `reaper_add_child`/`increase_buffer`.
    fn add(&mut self, pid: Pid, fd: RawFd) {
        let pos = if self.last_empty < self.records.len() && self.records[self.last_empty].fd == -1
        {
            self.last_empty
        } else if let Some(free) = self.records.iter().position(|r| r.fd == -1) {
            free
        } else {
            let old_len = self.records.len();
            self.records.resize(
                old_len * 2,
                ChildRecord { pid: Pid::from_raw(0), fd: -1 },
            );
            old_len
        };

        self.records[pos] = ChildRecord { pid, fd };
        self.last_empty = pos + 1;
    }

    fn position_of(&self, pid: Pid) -> Option<usize> {
        self.records.iter().position(|r| r.fd != -1 && r.pid == pid)
    }

    fn free(&mut self, pos: usize) {
        self.records[pos].fd = -1;
        self.last_empty = pos;
    }
}

/// Handle shared between the accept loop (which registers children) and
/// the background thread (which reaps them).
pub struct Reaper {
    table: Arc<Mutex<ChildTable>>,
}

impl Reaper {
    /// Allocates the child table and starts the background reaper
    /// thread. Mirrors `reaper_init`.
    pub fn spawn() -> Reaper {
        let table = Arc::new(Mutex::new(ChildTable::new()));
        let worker_table = Arc::clone(&table);
        thread::spawn(move || wait_children(worker_table));
        Reaper { table }
    }

    /// Registers a freshly forked child so the reaper thread can find it
    /// once `wait(2)` reports it dead. Mirrors `reaper_add_child`.
    pub fn add_child(&self, pid: Pid, conn_fd: RawFd) {
        self.table.lock().unwrap().add(pid, conn_fd);
    }
}

fn wait_children(table: Arc<Mutex<ChildTable>>) {
    let mut attempts = 0u32;
    loop {
        let status = match wait() {
            Ok(s) => s,
            Err(nix::Error::Sys(nix::errno::Errno::ECHILD)) => {
                // No children left to wait for; the dummy pause()'d
                // process keeps this from happening in practice, but
                // don't busy-loop if it somehow does.
                thread::sleep(PAUSE);
                continue;
            }
            Err(e) => crate::die!("wait(2) failed: {}", e),
        };

        let pid = match status {
            WaitStatus::Exited(pid, _) => pid,
            WaitStatus::Signaled(pid, _, _) => pid,
            other => {
                crate::log!(LogLevel::LogInfo, "wait(2) returned non-terminal status: {:?}", other);
                continue;
            }
        };

        let pos = loop {
            let found = table.lock().unwrap().position_of(pid);
            match found {
                Some(pos) => break pos,
                None => {
                    attempts += 1;
                    crate::log!(
                        LogLevel::LogCrit,
                        "unable to find child (pid: {}), attempt: {}/{}",
                        pid,
                        attempts,
                        MAX_ATTEMPTS
                    );
                    if attempts >= MAX_ATTEMPTS {
                        let err = PreloaderError::ChildReap { pid };
                        crate::die!("{}, attempts exceeded, aborting", err);
                    }
                    thread::sleep(PAUSE);
                }
            }
        };
        attempts = 0;

        let exit_code = translate_status(&status);
        let fd = table.lock().unwrap().records[pos].fd;

        if socket::send_int32(exit_code, fd).is_err() {
            crate::log!(
                LogLevel::LogCrit,
                "unable to send return value to (pid: {} / fd: {}), maybe disconnected?",
                pid,
                fd
            );
        }
        socket::close_fd(fd);

        table.lock().unwrap().free(pos);
    }
}

/// Exit code → shell convention: the raw exit code on normal exit, `128 +
/// signal` on signal death, `1` for anything else. Mirrors `wait_children`'s
/// `WIFEXITED`/`WIFSIGNALED` translation, "mimicking bash".
fn translate_status(status: &WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => *code,
        WaitStatus::Signaled(_, signal, _) => 128 + *signal as i32,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_reuses_last_empty_slot() {
        let mut t = ChildTable::new();
        t.add(Pid::from_raw(100), 5);
        assert_eq!(t.position_of(Pid::from_raw(100)), Some(0));
        t.free(0);
        t.add(Pid::from_raw(200), 7);
        assert_eq!(t.position_of(Pid::from_raw(200)), Some(0));
    }

    #[test]
    fn table_grows_when_full() {
        let mut t = ChildTable::new();
        for i in 0..INITIAL_CAPACITY {
            t.add(Pid::from_raw(1000 + i as i32), i as RawFd);
        }
        assert_eq!(t.records.len(), INITIAL_CAPACITY);
        t.add(Pid::from_raw(9999), 99);
        assert!(t.records.len() > INITIAL_CAPACITY);
        assert_eq!(t.position_of(Pid::from_raw(9999)), Some(INITIAL_CAPACITY));
    }

    #[test]
    fn translate_exit_code() {
        assert_eq!(translate_status(&WaitStatus::Exited(Pid::from_raw(1), 42)), 42);
    }

    #[test]
    fn translate_signal_uses_shell_convention() {
        assert_eq!(
            translate_status(&WaitStatus::Signaled(
                Pid::from_raw(1),
                nix::sys::signal::Signal::SIGKILL,
                false
            )),
            128 + 9
        );
    }
}
