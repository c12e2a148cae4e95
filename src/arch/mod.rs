//! Per-ISA entrypoint patching, behind one interface so the rest of the
//! engine (`entry.rs`, `daemon.rs`) never has to branch on target arch.
//!
//! Each submodule ports one of the original's `arch/arch_*.c` files:
//! a fixed-size machine-code stub that calls back into this process, a
//! backup buffer for the bytes it overwrites, and a restore routine that
//! also reports how many bytes to subtract from the return address the
//! host pushed (only nonzero when the stub embeds its target address
//! inline rather than purely via register-relative addressing).

#[cfg(target_arch = "x86_64")]
mod x86_64_impl;
#[cfg(target_arch = "x86_64")]
pub use x86_64_impl as isa;

#[cfg(target_arch = "x86")]
mod i686_impl;
#[cfg(target_arch = "x86")]
pub use i686_impl as isa;

#[cfg(target_arch = "arm")]
mod arm_impl;
#[cfg(target_arch = "arm")]
pub use arm_impl as isa;

#[cfg(target_arch = "riscv64")]
mod riscv64_impl;
#[cfg(target_arch = "riscv64")]
pub use riscv64_impl as isa;

use crate::error::{PreloaderError, Result};

/// Saved original bytes plus the address they were copied from, so
/// `restore` can put the host's `_start` back exactly as it found it.
pub struct PatchRecord {
    pub entry: usize,
    pub backup: Vec<u8>,
}

/// Applies this architecture's stub at `entry`, which must already be
/// mapped writable and executable (see `make_rwx`).
pub fn patch(entry: usize, target: usize) -> PatchRecord {
    isa::patch_start(entry, target)
}

/// Restores the bytes `patch` overwrote and returns the number of bytes
/// the caller must subtract from the return address pushed by the stub,
/// so the host resumes at the true original entrypoint.
pub fn restore(record: &PatchRecord) -> usize {
    isa::restore_start(record)
}

pub const STUB_LEN: usize = isa::PATCH_LEN;

/// Offset from `entry` at which the stub's branch-and-link instruction
/// actually leaves the return address — equal to `STUB_LEN` on x86/x86_64,
/// where the last instruction is the `call` itself, but short of it on
/// arm/riscv64, where the call instruction sits ahead of a trailing data
/// word that never executes.
pub const RETURN_OFFSET: usize = isa::RETURN_OFFSET;

/// mprotects the page(s covering `[addr, addr + len)` as RWX, matching the
/// original's `make_rwx`: entrypoints live in a read-only-executable
/// segment by default and must be made writable before patching.
pub fn make_rwx(addr: usize, len: usize) -> Result<()> {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let page_start = addr & !(page_size - 1);
    let end = addr + len;
    let span = end - page_start;
    let npages = (span + page_size - 1) / page_size;
    let total_len = npages * page_size;

    let rc = unsafe {
        libc::mprotect(
            page_start as *mut libc::c_void,
            total_len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        )
    };
    if rc != 0 {
        return Err(PreloaderError::Resource(format!(
            "mprotect({:#x}, {}) failed: {}",
            page_start,
            total_len,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}
