//! `preloader_cli`: the client side of the control protocol. Connects to
//! a running preloader daemon's control socket, hands it the current
//! working directory and a new argument vector plus the three standard
//! streams, and then behaves as transparently as possible as a stand-in
//! for the process the daemon forks on our behalf — forwarding SIGINT
//! and SIGTERM to it, and exiting with its exit code.
//!
//! Ported from `preloader_cli.c`'s `main`/`parse_args`/`sig_handler`.

use nix::sys::signal::{self, SigHandler, Signal};
use preloader::config::SV_DEFAULT_PORT;
use preloader::ipc::message::ControlRequest;
use preloader::ipc::socket;
use std::ffi::CString;
use std::sync::atomic::{AtomicI32, Ordering};

const PRG_NAME: &str = "preloader_cli";
const PID_PATH: &str = "/tmp";

/// PID of the process the daemon forked for us, `0` until the daemon
/// tells us. Plain `extern "C" fn` signal handlers can't close over
/// state, so this mirrors the original's file-scope `process_pid`.
static PROCESS_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn forward_signal(sig: libc::c_int) {
    let pid = PROCESS_PID.load(Ordering::SeqCst);
    if pid != 0 {
        unsafe {
            libc::kill(pid, sig);
        }
    }
}

fn install_forwarding() {
    unsafe {
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(forward_signal));
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(forward_signal));
    }
}

fn usage(prg_name: &str) -> ! {
    eprintln!(
        "Usage:\n  {0} [-p <port>] <program> <program-arguments>\nor\n  {0} <program-arguments>",
        prg_name
    );
    std::process::exit(libc::EXIT_FAILURE);
}

/// Splits this process's own `argv` into the port (if `-p <port>` was
/// given, and only when invoked under our own name rather than via a
/// renamed symlink) and the argument vector to hand the daemon. Mirrors
/// `parse_args`.
fn parse_args(argv: &[String]) -> (u16, &[String]) {
    if argv.len() < 2 {
        usage(&argv[0]);
    }

    let prog_base = std::path::Path::new(&argv[0])
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(&argv[0]);

    if prog_base != PRG_NAME {
        // Invoked via a renamed symlink (the usual `LD_PRELOAD`-adjacent
        // trick): pass argv straight through untouched.
        return (SV_DEFAULT_PORT, &argv[1..]);
    }

    if argv[1] == "-p" {
        if argv.len() < 4 {
            usage(&argv[0]);
        }
        let port: u16 = argv[2].parse().unwrap_or_else(|_| {
            eprintln!("Invalid port number: ({}), should be in: 0-65535", argv[2]);
            usage(&argv[0]);
        });
        (port, &argv[3..])
    } else {
        (SV_DEFAULT_PORT, &argv[1..])
    }
}

fn main() {
    install_forwarding();

    let argv: Vec<String> = std::env::args().collect();
    let (port, program_argv) = parse_args(&argv);

    let cwd = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("unable to read current directory: {}", e);
        std::process::exit(libc::EXIT_FAILURE);
    });
    let cwd = CString::new(cwd.into_os_string().into_string().unwrap_or_default())
        .expect("cwd contains a NUL byte");

    let argv_c: Vec<CString> = program_argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).expect("argument contains a NUL byte"))
        .collect();

    let request = ControlRequest::new(cwd, argv_c);
    let payload = request.encode();

    let socket_path = format!("{}/preloader_{}.sock", PID_PATH, port);
    let fds = (libc::STDOUT_FILENO, libc::STDERR_FILENO, libc::STDIN_FILENO);

    let sock = socket::send_request(&socket_path, &payload, fds).unwrap_or_else(|e| {
        eprintln!("unable to connect on sv port {}: {}", port, e);
        std::process::exit(libc::EXIT_FAILURE);
    });

    let mut ret: i32 = 42;

    if let Ok(pid) = socket::recv_int32(sock) {
        PROCESS_PID.store(pid, Ordering::SeqCst);
        ret = pid;

        // Our fds were already sent to the daemon and are used directly
        // by the forked process; nothing to poll here.
        if let Ok(status) = socket::recv_int32(sock) {
            ret = status;
        }
    }

    socket::close_fd(sock);
    std::process::exit(ret);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn own_name_with_no_port_passes_argv_through_minus_self() {
        let a = argv(&["/usr/bin/preloader_cli", "test", "a", "b"]);
        let (port, rest) = parse_args(&a);
        assert_eq!(port, SV_DEFAULT_PORT);
        assert_eq!(rest, ["test", "a", "b"]);
    }

    #[test]
    fn own_name_with_explicit_port() {
        let a = argv(&["preloader_cli", "-p", "4000", "test", "a"]);
        let (port, rest) = parse_args(&a);
        assert_eq!(port, 4000);
        assert_eq!(rest, ["test", "a"]);
    }

    #[test]
    fn renamed_symlink_passes_full_argv_through() {
        // Invoked as if `test` were a symlink to `preloader_cli`: argv[0]
        // isn't `preloader_cli`, so nothing after it is touched, not even
        // looking for `-p`.
        let a = argv(&["/usr/local/bin/test", "-p", "4000", "a"]);
        let (port, rest) = parse_args(&a);
        assert_eq!(port, SV_DEFAULT_PORT);
        assert_eq!(rest, ["-p", "4000", "a"]);
    }
}
