//! Singleton enforcement: one daemon per `(pid_path, port)` pair.
//!
//! Ported from `read_and_check_pid`/`create_pid`/`get_pid_file_path` in
//! `util.c`. The strict digit-by-digit parse (reject anything that isn't
//! `[0-9]`) and the `kill(pid, 0)` liveness probe are both load-bearing:
//! a pid file that merely *looks* numeric but was corrupted by a crash
//! mid-write must be treated as stale rather than silently truncated by
//! a permissive parser.

use crate::error::{PreloaderError, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;

pub fn pid_file_path(pid_path: &str, port: u16) -> String {
    format!("{}/preloader_{}.pid", pid_path, port)
}

/// Returns `true` if the caller should proceed with initialization
/// (no other daemon is alive for this `(pid_path, port)`), `false` if an
/// existing daemon already owns it and this instance should no-op.
///
/// Mirrors `read_and_check_pid`'s return-value convention inverted into a
/// more legible `bool`: the original returns 0 for "already running,
/// stop" and -1 for "proceed"; any malformed or stale file is unlinked
/// either way so a later run starts clean.
pub fn read_and_check_pid(pid_path: &str, port: u16) -> bool {
    let path = pid_file_path(pid_path, port);

    let mut file = match OpenOptions::new().read(true).open(&path) {
        Ok(f) => f,
        Err(_) => return true,
    };

    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_err() {
        drop(file);
        let _ = std::fs::remove_file(&path);
        return true;
    }
    drop(file);

    let pid = match parse_strict_decimal(&contents) {
        Some(pid) => pid,
        None => {
            let _ = std::fs::remove_file(&path);
            return true;
        }
    };

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => false,
        Err(_) => {
            let _ = std::fs::remove_file(&path);
            true
        }
    }
}

/// Digit-only parse: any non-`[0-9]` byte anywhere in the file (including
/// a trailing newline) makes the whole file malformed, matching `util.c`'s
/// loop which `goto err0`s on the first non-digit character.
fn parse_strict_decimal(s: &str) -> Option<i32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<i32>().ok()
}

/// Writes the current process's pid as decimal ASCII, mode 0644, matching
/// `create_pid`.
pub fn create_pid(pid_path: &str, port: u16) -> Result<()> {
    let path = pid_file_path(pid_path, port);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(&path)
        .map_err(|e| PreloaderError::Resource(format!("creating pid file {}: {}", path, e)))?;

    write!(file, "{}", nix::unistd::getpid())
        .map_err(|e| PreloaderError::Resource(format!("writing pid file {}: {}", path, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn no_file_means_proceed() {
        let dir = tempdir().unwrap();
        assert!(read_and_check_pid(dir.path().to_str().unwrap(), 3636));
    }

    #[test]
    fn malformed_file_is_unlinked_and_proceeds() {
        let dir = tempdir().unwrap();
        let path = pid_file_path(dir.path().to_str().unwrap(), 3636);
        std::fs::write(&path, "not-a-pid").unwrap();

        assert!(read_and_check_pid(dir.path().to_str().unwrap(), 3636));
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn dead_pid_is_unlinked_and_proceeds() {
        let dir = tempdir().unwrap();
        let path = pid_file_path(dir.path().to_str().unwrap(), 3636);
        // PID 1 is init and long-lived, so pick a pid unlikely to exist:
        // the max pid plus one, which kill(2) will reject with ESRCH.
        std::fs::write(&path, "99999999").unwrap();

        assert!(read_and_check_pid(dir.path().to_str().unwrap(), 3636));
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn live_pid_means_no_op() {
        let dir = tempdir().unwrap();
        let path = pid_file_path(dir.path().to_str().unwrap(), 3636);
        std::fs::write(&path, nix::unistd::getpid().to_string()).unwrap();

        assert!(!read_and_check_pid(dir.path().to_str().unwrap(), 3636));
        assert!(std::path::Path::new(&path).exists());
    }

    #[test]
    fn create_pid_writes_current_pid() {
        let dir = tempdir().unwrap();
        create_pid(dir.path().to_str().unwrap(), 3636).unwrap();
        let path = pid_file_path(dir.path().to_str().unwrap(), 3636);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, nix::unistd::getpid().to_string());
    }
}
