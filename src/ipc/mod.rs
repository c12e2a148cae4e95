//! The local control channel: wire format (`message`) and the AF_UNIX
//! transport that carries it (`socket`). Split the way `ipc.h` separates
//! the protocol's data shape from its socket plumbing.

pub mod message;
pub mod socket;

pub use message::ControlRequest;
pub use socket::{Endpoint, FdTriple};
