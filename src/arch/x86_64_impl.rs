//! `movabs $imm64, %rax ; callq *%rax` — 12 bytes.
//!
//! Ported from `arch/arch_x86_64.c`, minus the original's leading
//! `push %rdx`: that push existed to keep a second, now-unused backup of
//! the atexit-handler pointer glibc's `_start` hands in `%rdx`, not for
//! stack alignment — the trampoline wrapper in `trampoline.rs` reads
//! `%rdx` directly into the register `preloader_land` expects it in, so
//! nothing here needs it parked on the stack. `callq *%rax` itself already
//! pushes the true return address where `StartupStack::locate` expects to
//! find it, same as every other x86 stub. The embedded call target is
//! restored wholesale with the rest of the backup bytes; there is no
//! separate "address word" adjustment on return like arm/riscv64, since
//! the call target here is absolute rather than PC-relative plus a
//! trailing constant.

use super::PatchRecord;
use std::ptr;

pub const PATCH_LEN: usize = 12;
pub const RETURN_OFFSET: usize = PATCH_LEN;

pub fn patch_start(entry: usize, target: usize) -> PatchRecord {
    let mut stub = [
        0x48, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, // movabs $imm64, %rax
        0xff, 0xd0, // callq *%rax
    ];
    stub[2..10].copy_from_slice(&(target as u64).to_ne_bytes());

    let backup = unsafe {
        let mut b = vec![0u8; PATCH_LEN];
        ptr::copy_nonoverlapping(entry as *const u8, b.as_mut_ptr(), PATCH_LEN);
        ptr::copy_nonoverlapping(stub.as_ptr(), entry as *mut u8, PATCH_LEN);
        b
    };

    PatchRecord { entry, backup }
}

pub fn restore_start(record: &PatchRecord) -> usize {
    unsafe {
        ptr::copy_nonoverlapping(
            record.backup.as_ptr(),
            record.entry as *mut u8,
            record.backup.len(),
        );
    }
    record.backup.len()
}
