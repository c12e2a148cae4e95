//! `auipc a1, 0 ; ld a1, 8(a1) ; jalr a1 ; <target addr>` — 16 bytes,
//! preserves `x0`/`a0`.
//!
//! Ported from `arch/arch_riscv.c`. As with arm, the trailing 8-byte word
//! is data the `ld` pulls in, not code, so it's excluded from the return
//! address fixup on restore.

use super::PatchRecord;
use std::ptr;

pub const PATCH_LEN: usize = 16;
const ADDR_WORD_LEN: usize = 8;
/// Where `jalr` actually sets `ra`: right past itself, at the start of the
/// trailing data word — not past the whole stub.
pub const RETURN_OFFSET: usize = PATCH_LEN - ADDR_WORD_LEN;

pub fn patch_start(entry: usize, target: usize) -> PatchRecord {
    let mut stub = [
        0x97, 0x05, 0x00, 0x00, // auipc a1, 0
        0x8c, 0x65, // ld a1, 8(a1)
        0x82, 0x95, // jalr a1
        0, 0, 0, 0, 0, 0, 0, 0, // target address
    ];
    stub[8..16].copy_from_slice(&(target as u64).to_ne_bytes());

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
    record.backup.len() - ADDR_WORD_LEN
}
