//! The AF_UNIX control socket: server side (`Endpoint`) and the client-side
//! `send_request` helper, both speaking the wire format in `ipc::message`.
//!
//! Ported from `ipc_init`/`ipc_wait_conn`/`ipc_recv_msg`/`ipc_send_int32` in
//! `ipc.c` (server) and `do_connect`/`send_fds` in `preloader_cli.c`
//! (client), with `ipc.h`'s real signature — `ipc_recv_msg(conn_fd, out,
//! err, in, argc_p)` — as the ground truth for the three-fd SCM_RIGHTS
//! shape, since the `ipc.c` file that survived retrieval is an earlier
//! TCP-only prototype without fd-passing.

use crate::error::{PreloaderError, Result};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{
    accept, bind, connect, listen, recvmsg, sendmsg, socket, AddressFamily, ControlMessage,
    ControlMessageOwned, MsgFlags, SockAddr, SockFlag, SockType, UnixAddr,
};
use nix::sys::uio::IoVec;
use nix::unistd::{close, read, write};
use std::os::unix::io::RawFd;

use super::message::{decode_header, HEADER_LEN};

pub const SV_MAX_CLIENTS: usize = 16;
const FIRST_BYTE_TIMEOUT_MS: i32 = 128;

/// Three descriptors received as ancillary data with one control message,
/// in the order the wire format fixes: `{stdout, stderr, stdin}`. Closing
/// is explicit so callers can `dup2` them onto 1/2/0 first and only then
/// drop the originals — matching `ipc_close` being called right after the
/// `dup2`s in `setup_child`.
pub struct FdTriple {
    pub stdout: RawFd,
    pub stderr: RawFd,
    pub stdin: RawFd,
}

impl Drop for FdTriple {
    fn drop(&mut self) {
        for fd in [self.stdout, self.stderr, self.stdin] {
            let _ = close(fd);
        }
    }
}

/// The server-side listening socket, bound at
/// `{pid_path}/preloader_{port}.sock`.
pub struct Endpoint {
    listen_fd: RawFd,
}

impl Endpoint {
    pub fn bind(path: &str) -> Result<Endpoint> {
        let unix_addr = UnixAddr::new(path)
            .map_err(|e| PreloaderError::Config(format!("socket path {}: {}", path, e)))?;
        let addr = SockAddr::Unix(unix_addr);

        let fd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
            .map_err(|e| PreloaderError::Ipc(format!("socket(2) failed: {}", e)))?;

        // A stale socket file from a crashed daemon blocks bind(2); the
        // pidfile manager already established liveness before we get
        // here, so any leftover file at this path is safe to remove.
        let _ = std::fs::remove_file(path);

        bind(fd, &addr).map_err(|e| PreloaderError::Ipc(format!("bind({}) failed: {}", path, e)))?;
        listen(fd, SV_MAX_CLIENTS)
            .map_err(|e| PreloaderError::Ipc(format!("listen({}) failed: {}", path, e)))?;

        Ok(Endpoint { listen_fd: fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listen_fd
    }

    /// Blocks until a client connects, matching `ipc_wait_conn`.
    pub fn wait_conn(&self) -> Result<RawFd> {
        accept(self.listen_fd).map_err(|e| PreloaderError::Ipc(format!("accept(2) failed: {}", e)))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let _ = close(self.listen_fd);
    }
}

/// Waits up to 128ms for the first byte of a control message to arrive,
/// then reads the 8-byte header, the three ancillary fds, and the rest of
/// the payload. Mirrors `ipc_recv_msg`: timeout, missing/malformed
/// ancillary data, and short reads are all `PreloaderError::Ipc` (dropped
/// per-request, not fatal).
pub fn recv_msg(conn: RawFd) -> Result<(FdTriple, Vec<u8>, usize)> {
    let mut poll_fds = [PollFd::new(conn, PollFlags::POLLIN)];
    let n = poll(&mut poll_fds, FIRST_BYTE_TIMEOUT_MS)
        .map_err(|e| PreloaderError::Ipc(format!("poll(2) failed: {}", e)))?;
    if n == 0 {
        return Err(PreloaderError::Ipc(format!(
            "no data within {}ms, dropping connection",
            FIRST_BYTE_TIMEOUT_MS
        )));
    }

    let mut header = [0u8; HEADER_LEN];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 3]);
    let msg = recvmsg(
        conn,
        &[IoVec::from_mut_slice(&mut header)],
        Some(&mut cmsg_buffer),
        MsgFlags::empty(),
    )
    .map_err(|e| PreloaderError::Ipc(format!("recvmsg(2) failed: {}", e)))?;

    let mut fd_triple: Option<FdTriple> = None;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            if received.len() != 3 {
                return Err(PreloaderError::Ipc(format!(
                    "expected 3 SCM_RIGHTS fds, got {}",
                    received.len()
                )));
            }
            fd_triple = Some(FdTriple {
                stdout: received[0],
                stderr: received[1],
                stdin: received[2],
            });
        }
    }
    let fd_triple = fd_triple
        .ok_or_else(|| PreloaderError::Ipc("control message carried no ancillary fds".into()))?;

    // The kernel is free to hand back fewer than HEADER_LEN bytes in one
    // recvmsg call even though the client sent them all at once; top the
    // header off with plain reads if needed.
    if msg.bytes < header.len() {
        read_exact(conn, &mut header[msg.bytes..])?;
    }

    let (argc, total_bytes) = decode_header(&header)?;

    let mut body = vec![0u8; total_bytes - HEADER_LEN];
    read_exact(conn, &mut body)?;

    Ok((fd_triple, body, argc))
}

fn read_exact(fd: RawFd, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read(fd, &mut buf[filled..])
            .map_err(|e| PreloaderError::Ipc(format!("read(2) failed: {}", e)))?;
        if n == 0 {
            return Err(PreloaderError::Ipc("connection closed mid-payload".into()));
        }
        filled += n;
    }
    Ok(())
}

/// Sends one big-endian `i32`, matching `ipc_send_int32`.
pub fn send_int32(value: i32, fd: RawFd) -> Result<()> {
    let bytes = value.to_be_bytes();
    let mut written = 0;
    while written < bytes.len() {
        let n = write(fd, &bytes[written..])
            .map_err(|e| PreloaderError::Ipc(format!("write(2) failed: {}", e)))?;
        written += n;
    }
    Ok(())
}

/// Reads one big-endian `i32`, used by the client to decode the PID and
/// exit-status replies.
pub fn recv_int32(fd: RawFd) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exact(fd, &mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Connects to `path` and sends `payload` along with the three standard
/// streams as ancillary SCM_RIGHTS data, matching `do_connect` +
/// `send_fds`.
pub fn send_request(path: &str, payload: &[u8], fds: (RawFd, RawFd, RawFd)) -> Result<RawFd> {
    let unix_addr = UnixAddr::new(path)
        .map_err(|e| PreloaderError::Config(format!("socket path {}: {}", path, e)))?;
    let addr = SockAddr::Unix(unix_addr);

    let sock = socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
        .map_err(|e| PreloaderError::Ipc(format!("socket(2) failed: {}", e)))?;

    connect(sock, &addr).map_err(|e| PreloaderError::Ipc(format!("connect({}) failed: {}", path, e)))?;

    let raw_fds = [fds.0, fds.1, fds.2];
    let cmsg = [ControlMessage::ScmRights(&raw_fds)];
    let iov = [IoVec::from_slice(payload)];
    sendmsg(sock, &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| PreloaderError::Ipc(format!("sendmsg(2) failed: {}", e)))?;

    Ok(sock)
}

pub fn close_fd(fd: RawFd) {
    let _ = close(fd);
}
