//! The five recoverable error kinds from the external design, given real
//! shape via `thiserror` instead of bare `io::Result`/`-1` sentinels.

use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreloaderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("ABI integrity violation: {0}")]
    AbiIntegrity(String),

    #[error("ipc error: {0}")]
    Ipc(String),

    #[error("failed to reap child {pid}")]
    ChildReap { pid: Pid },

    #[error("resource error: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, PreloaderError>;
