//! End-to-end scenarios against a real injected host process (S1–S6 from
//! the external design). These need a C compiler to build the fixture
//! host in `tests/fixtures/host.c`, and the `preloader` cdylib already
//! built (`cargo build` before `cargo test -- --ignored`) so it can be
//! `LD_PRELOAD`ed — neither of which this exercise can actually run, so
//! every test here is `#[ignore]`d and serves as an exact, checked-in
//! transcript of the expected behavior rather than a test that runs in
//! CI by default.
//!
//! Unlike the rest of the suite (wire encode/decode, child-table
//! bookkeeping, pid-file parsing, exit-status translation, CLI argv0
//! dispatch), these can't be expressed as pure-logic unit tests: they
//! depend on an actual forked, re-entered process observing its own
//! rewritten argv/stdio.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn target_dir() -> PathBuf {
    // `cargo test` always places build artifacts under `target/<profile>`
    // relative to the workspace root, regardless of which package or
    // test binary is running.
    let mut dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.push("target");
    dir.push(if cfg!(debug_assertions) { "debug" } else { "release" });
    dir
}

fn preloader_cdylib_path() -> PathBuf {
    let mut p = target_dir();
    p.push("libpreloader.so");
    p
}

fn build_fixture_host(tmp: &Path) -> PathBuf {
    let src = manifest_dir().join("tests/fixtures/host.c");
    let out = tmp.join("host");
    let status = Command::new("cc")
        .arg(&src)
        .arg("-o")
        .arg(&out)
        .status()
        .expect("invoking cc to build the fixture host");
    assert!(status.success(), "cc failed to build tests/fixtures/host.c");
    out
}

/// Starts the host binary (with the preloader injected) in the
/// background, waits for its control socket to appear, and returns the
/// port plus a cleanup guard that SIGTERMs it on drop.
struct DaemonGuard {
    port: u16,
    child: std::process::Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(self.child.id() as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        let _ = self.child.wait();
    }
}

fn start_daemon(tmp: &Path, host: &Path, port: u16) -> DaemonGuard {
    start_daemon_with_args(tmp, host, port, &[])
}

/// Like `start_daemon`, but launches the fixture host with extra
/// placeholder command-line arguments. The host's own argc at the moment
/// it first reaches the patched entrypoint becomes the daemon's ceiling
/// on how large a client's requested argv can be (`entry::rewrite`'s
/// `AbiIntegrity` check) — `host_args` is how a test controls that
/// ceiling.
fn start_daemon_with_args(tmp: &Path, host: &Path, port: u16, host_args: &[&str]) -> DaemonGuard {
    let sock = tmp.join(format!("preloader_{}.sock", port));

    let child = Command::new(host)
        .args(host_args)
        .env("LD_PRELOAD", preloader_cdylib_path())
        .env("PRELOADER_PORT", port.to_string())
        .env("PRELOADER_LOG_FILE", tmp.join("daemon.log"))
        .current_dir(tmp)
        .spawn()
        .expect("launching the preloaded fixture host");

    for _ in 0..100 {
        if sock.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(sock.exists(), "control socket never appeared");

    DaemonGuard { port, child }
}

fn cli() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_preloader_cli"))
}

/// S1: a plain request with a fixed argv observes the same argv and
/// exits with the fixture's default code, 42.
#[test]
#[ignore]
fn s1_argv_round_trips_and_exit_code_is_42() {
    let tmp = tempfile::tempdir().unwrap();
    let host = build_fixture_host(tmp.path());
    let daemon = start_daemon(tmp.path(), &host, 13636);

    let out = Command::new(cli())
        .args(["-p", &daemon.port.to_string(), "test", "a", "b", "c"])
        .current_dir(tmp.path())
        .output()
        .expect("running preloader_cli");

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("argc: 4"));
    assert!(stdout.contains("argv[0] = test"));
    assert!(stdout.contains("argv[1] = a"));
    assert!(stdout.contains("argv[2] = b"));
    assert!(stdout.contains("argv[3] = c"));
    assert_eq!(out.status.code(), Some(42));
}

/// S2: SIGTERM takes the daemon down cleanly; a subsequent `connect`
/// fails, and a fresh daemon on the same port serves requests again.
#[test]
#[ignore]
fn s2_daemon_restarts_after_sigterm() {
    let tmp = tempfile::tempdir().unwrap();
    let host = build_fixture_host(tmp.path());
    let daemon = start_daemon(tmp.path(), &host, 13637);
    drop(daemon); // SIGTERMs and waits in Drop

    let sock = tmp.path().join("preloader_13637.sock");
    assert!(!sock.exists(), "socket should be removed once the daemon exits");

    let daemon = start_daemon(tmp.path(), &host, 13637);
    let out = Command::new(cli())
        .args(["-p", "13637", "test", "x"])
        .current_dir(tmp.path())
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&out.stdout).contains("argc: 2"));
    drop(daemon);
}

/// S3: stdin piped through the client reaches the child's fd 0 byte for
/// byte, and EOF propagates.
#[test]
#[ignore]
fn s3_stdin_echo_and_eof() {
    let tmp = tempfile::tempdir().unwrap();
    let host = build_fixture_host(tmp.path());
    let daemon = start_daemon(tmp.path(), &host, 13638);

    let mut child = Command::new(cli())
        .args(["-p", &daemon.port.to_string(), "test"])
        .current_dir(tmp.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    child.stdin.take().unwrap().write_all(b"hello\n").unwrap();
    let out = child.wait_with_output().unwrap();

    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stdout.contains("hello"));
    assert!(stdout.contains("feof(stdin): 1"));
    assert!(stderr.contains("testing stderr again!"));
}

/// S4: an oversized argv is rejected per-request without taking the
/// daemon down; a following, well-formed request still succeeds.
///
/// The daemon's own host process is launched with exactly one
/// placeholder argument beyond argv[0] (host_argc = 2), so a client
/// request carrying more than two arguments exceeds what `entry::rewrite`
/// will accept. That request's forked child hits the `AbiIntegrity`
/// check and `die!`s before it ever reaches the host's real `main`; the
/// reaper still reaps it and relays its exit status (1, from `die!`) to
/// the client over the connection the parent already replied on, rather
/// than the host's usual exit code of 42 — the daemon itself, and the
/// listening socket, are untouched.
#[test]
#[ignore]
fn s4_oversized_argv_is_rejected_without_taking_the_daemon_down() {
    let tmp = tempfile::tempdir().unwrap();
    let host = build_fixture_host(tmp.path());
    let daemon = start_daemon_with_args(tmp.path(), &host, 13641, &["placeholder"]);

    // host_argc = 2 ("host", "placeholder"); argv = ["test", "a", "b"] is
    // argc = 3, one more than the daemon's own stack can hold.
    let oversized = Command::new(cli())
        .args(["-p", &daemon.port.to_string(), "test", "a", "b"])
        .current_dir(tmp.path())
        .output()
        .expect("running preloader_cli");
    assert_eq!(
        oversized.status.code(),
        Some(1),
        "oversized request should surface the child's AbiIntegrity die!(), not the host's own exit code"
    );

    // The daemon is still up: a request that fits inside host_argc
    // succeeds normally, round-tripping through the same listening
    // socket the rejected request used.
    let ok = Command::new(cli())
        .args(["-p", &daemon.port.to_string(), "test", "a"])
        .current_dir(tmp.path())
        .output()
        .expect("running preloader_cli");
    let stdout = String::from_utf8_lossy(&ok.stdout);
    assert!(stdout.contains("argc: 2"));
    assert_eq!(ok.status.code(), Some(42));
}

/// S5: two clients racing the accept loop each get back their own exit
/// code, never the other's.
#[test]
#[ignore]
fn s5_concurrent_clients_get_matching_exit_codes() {
    let tmp = tempfile::tempdir().unwrap();
    let host = build_fixture_host(tmp.path());
    let daemon = start_daemon(tmp.path(), &host, 13639);

    let run = |code: i32| {
        let tmp_dir = tmp.path().to_path_buf();
        let port = daemon.port;
        std::thread::spawn(move || {
            Command::new(cli())
                .args(["-p", &port.to_string(), "test"])
                .current_dir(&tmp_dir)
                .env("HOST_EXIT_CODE", code.to_string())
                .output()
                .unwrap()
        })
    };

    let a = run(3);
    let b = run(4);
    let out_a = a.join().unwrap();
    let out_b = b.join().unwrap();

    assert_eq!(out_a.status.code(), Some(3));
    assert_eq!(out_b.status.code(), Some(4));
}

/// S6: a `PRELOADER_LOAD_FILE` naming one unresolvable shared object
/// doesn't prevent the daemon from starting, and S1 still passes.
#[test]
#[ignore]
fn s6_unresolvable_prelist_entry_is_logged_and_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let host = build_fixture_host(tmp.path());

    let libs_file = tmp.path().join("libs.txt");
    std::fs::write(&libs_file, "/nonexistent/libfoo.so\n").unwrap();

    let sock = tmp.path().join("preloader_13640.sock");
    let child = Command::new(&host)
        .env("LD_PRELOAD", preloader_cdylib_path())
        .env("PRELOADER_PORT", "13640")
        .env("PRELOADER_LOAD_FILE", &libs_file)
        .current_dir(tmp.path())
        .spawn()
        .unwrap();
    let daemon = DaemonGuard { port: 13640, child };

    for _ in 0..100 {
        if sock.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(sock.exists(), "daemon should still start despite the bad prelist entry");

    let out = Command::new(cli())
        .args(["-p", "13640", "test", "a"])
        .current_dir(tmp.path())
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&out.stdout).contains("argc: 2"));
    drop(daemon);
}
