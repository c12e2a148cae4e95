//! Minimal level-filtered logger, in the spirit of the original's `log.c`:
//! a file descriptor (or stderr), a configured threshold, and a `log!`
//! macro rather than an external logging framework. Filtering is exact-level
//! rather than a severity floor — see `log_line` below.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Mutex;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LogLevel {
    LogInfo,
    LogErr,
    LogCrit,
    /// Not a real severity, only usable as a configured threshold: shows
    /// everything regardless of level.
    LogAll,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::LogInfo => "info",
            LogLevel::LogErr => "err",
            LogLevel::LogCrit => "crit",
            LogLevel::LogAll => "all",
        }
    }

    pub fn from_env_value(v: &str) -> Option<LogLevel> {
        match v {
            "info" => Some(LogLevel::LogInfo),
            "err" => Some(LogLevel::LogErr),
            "crit" => Some(LogLevel::LogCrit),
            "all" => Some(LogLevel::LogAll),
            _ => None,
        }
    }
}

struct Sink {
    file: std::fs::File,
    level: LogLevel,
}

lazy_static! {
    static ref SINK: Mutex<Option<Sink>> = Mutex::new(None);
}

/// A `File` that writes to the real stderr without owning fd 2: wraps a
/// `dup(2)` of it, so dropping the `File` (as happens whenever `close()`
/// replaces or clears the sink) closes only the duplicate, leaving the
/// process's actual stderr open for whatever runs next.
fn stderr_file() -> std::fs::File {
    unsafe { std::fs::File::from_raw_fd(libc::dup(libc::STDERR_FILENO)) }
}

/// Opens the configured log file, falling back to stderr on any failure,
/// exactly as the original's `log_init` does: a daemon with no writable
/// log destination still has to run.
pub fn init(path: Option<&str>, level: LogLevel) {
    let file = match path {
        Some(p) => OpenOptions::new()
            .append(true)
            .create(true)
            .open(p)
            .unwrap_or_else(|_| stderr_file()),
        None => stderr_file(),
    };
    *SINK.lock().unwrap() = Some(Sink { file, level });
}

pub fn close() {
    *SINK.lock().unwrap() = None;
}

pub fn raw_fd() -> RawFd {
    match SINK.lock().unwrap().as_ref() {
        Some(s) => s.file.as_raw_fd(),
        None => libc::STDERR_FILENO,
    }
}

#[doc(hidden)]
pub fn log_line(level: LogLevel, args: std::fmt::Arguments) {
    let mut guard = SINK.lock().unwrap();
    let sink = match guard.as_mut() {
        Some(s) => s,
        // No sink configured yet (e.g. a config error raised before
        // `log::init` has run): critical messages still need to reach
        // someone, so fall back to stderr directly, matching `log_msg`'s
        // own `args`-may-be-null fallback.
        None => {
            let mut stderr = unsafe { std::fs::File::from_raw_fd(libc::STDERR_FILENO) };
            let _ = writeln!(stderr, "[{}] {}", level.tag(), args);
            std::mem::forget(stderr);
            return;
        }
    };
    // Exact-level matching, not a severity floor: `info` only prints when
    // the configured level is `info` or `all`, `err` only for `err`/`all`,
    // and `crit` always prints regardless of the configured level.
    if level != LogLevel::LogCrit && level != sink.level && sink.level != LogLevel::LogAll {
        return;
    }
    let _ = writeln!(sink.file, "[{}] {}", level.tag(), args);
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::log_line($level, format_args!($($arg)*))
    };
}

/// Logs at `LogCrit` (always shown) and terminates the process immediately
/// via `_exit`, matching the original's `die()` macro: no unwinding, no
/// atexit handlers, just gone.
#[macro_export]
macro_rules! die {
    ($($arg:tt)*) => {{
        $crate::log!($crate::log::LogLevel::LogCrit, $($arg)*);
        unsafe { libc::_exit(1) }
    }};
}
