//! Wire encode/decode for the control message both the client and the
//! daemon speak, shared between `bin/preloader_cli.rs` and `daemon.rs`.
//!
//! Ported from `prepare_data`/`int32_to_msg` in `preloader_cli.c` (encode
//! side) and `ipc_recv_msg`/`msg_to_int32` in the daemon's own `ipc.c`
//! (decode side). The format is an 8-byte big-endian header — `argc`, then
//! `total_bytes` counting the header itself — followed by
//! `CWD\0argv[0]\0...argv[argc-1]\0`.

use crate::error::{PreloaderError, Result};
use std::convert::TryInto;
use std::ffi::CString;

pub const HEADER_LEN: usize = 8;

/// One decoded request: the new working directory and argument vector a
/// client wants the daemon's next forked child to run with.
pub struct ControlRequest {
    pub cwd: CString,
    pub argv: Vec<CString>,
}

impl ControlRequest {
    pub fn new(cwd: CString, argv: Vec<CString>) -> ControlRequest {
        ControlRequest { cwd, argv }
    }

    /// Encodes this request as the client sends it: header, then the
    /// NUL-joined `cwd`/`argv` payload. Mirrors `prepare_data`.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(self.cwd.as_bytes_with_nul());
        for arg in &self.argv {
            body.extend_from_slice(arg.as_bytes_with_nul());
        }

        let total_bytes = (HEADER_LEN + body.len()) as i32;
        let argc = self.argv.len() as i32;

        let mut out = Vec::with_capacity(total_bytes as usize);
        out.extend_from_slice(&argc.to_be_bytes());
        out.extend_from_slice(&total_bytes.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decodes the payload that follows the 8-byte header (`body` is
    /// exactly `total_bytes - HEADER_LEN` bytes), given the `argc` read
    /// from the header. Mirrors the CWD/argv splitting that `preloader.c`'s
    /// `change_argv` does in place on the host stack, done here instead
    /// against an owned buffer before anything touches the stack.
    pub fn decode(body: &[u8], argc: usize) -> Result<ControlRequest> {
        let mut parts = body.split(|&b| b == 0);
        let cwd_bytes = parts
            .next()
            .ok_or_else(|| PreloaderError::Ipc("control payload missing CWD".into()))?;
        let cwd = CString::new(cwd_bytes)
            .map_err(|e| PreloaderError::Ipc(format!("CWD contains NUL byte: {}", e)))?;

        let mut argv = Vec::with_capacity(argc);
        for i in 0..argc {
            let arg_bytes = parts.next().ok_or_else(|| {
                PreloaderError::Ipc(format!("control payload missing argv[{}]", i))
            })?;
            let arg = CString::new(arg_bytes)
                .map_err(|e| PreloaderError::Ipc(format!("argv[{}] contains NUL byte: {}", i, e)))?;
            argv.push(arg);
        }

        Ok(ControlRequest { cwd, argv })
    }
}

/// Parses the 8-byte big-endian header into `(argc, total_bytes)`.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(usize, usize)> {
    let argc = i32::from_be_bytes(header[0..4].try_into().unwrap());
    let total_bytes = i32::from_be_bytes(header[4..8].try_into().unwrap());

    if argc < 0 {
        return Err(PreloaderError::Ipc(format!("negative argc in header: {}", argc)));
    }
    if (total_bytes as usize) < HEADER_LEN {
        return Err(PreloaderError::Ipc(format!(
            "total_bytes ({}) shorter than the header itself",
            total_bytes
        )));
    }

    Ok((argc as usize, total_bytes as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn round_trips_cwd_and_argv() {
        let req = ControlRequest::new(cstr("/tmp"), vec![cstr("test"), cstr("a"), cstr("b")]);
        let wire = req.encode();

        let (argc, total_bytes) = decode_header(&wire[0..HEADER_LEN].try_into().unwrap()).unwrap();
        assert_eq!(argc, 3);
        assert_eq!(total_bytes, wire.len());

        let decoded = ControlRequest::decode(&wire[HEADER_LEN..], argc).unwrap();
        assert_eq!(decoded.cwd, cstr("/tmp"));
        assert_eq!(decoded.argv, vec![cstr("test"), cstr("a"), cstr("b")]);
    }

    #[test]
    fn empty_argv_is_legal() {
        let req = ControlRequest::new(cstr("/"), vec![]);
        let wire = req.encode();
        let (argc, _) = decode_header(&wire[0..HEADER_LEN].try_into().unwrap()).unwrap();
        assert_eq!(argc, 0);
        let decoded = ControlRequest::decode(&wire[HEADER_LEN..], argc).unwrap();
        assert!(decoded.argv.is_empty());
    }

    #[test]
    fn rejects_negative_argc() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&(-1i32).to_be_bytes());
        header[4..8].copy_from_slice(&8i32.to_be_bytes());
        assert!(decode_header(&header).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        let req = ControlRequest::new(cstr("/tmp"), vec![cstr("a"), cstr("b")]);
        let wire = req.encode();
        // Drop the last argument's bytes.
        let short = &wire[HEADER_LEN..wire.len() - 2];
        assert!(ControlRequest::decode(short, 2).is_err());
    }
}
