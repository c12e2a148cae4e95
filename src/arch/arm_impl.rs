//! `ldr r1, [pc] ; blx r1 ; <target addr>` — 12 bytes, preserves `r0`.
//!
//! Ported from `arch/arch_arm.c`. The trailing 4 bytes are a data word
//! (the call target), not an instruction, so on restore only the first
//! 8 bytes need to be accounted for when fixing up the return address —
//! the embedded word itself isn't part of what executed.

use super::PatchRecord;
use std::ptr;

pub const PATCH_LEN: usize = 12;
const ADDR_WORD_LEN: usize = 4;
/// Where `blx` actually sets `lr`: right past itself, at the start of the
/// trailing data word — not past the whole stub.
pub const RETURN_OFFSET: usize = PATCH_LEN - ADDR_WORD_LEN;

pub fn patch_start(entry: usize, target: usize) -> PatchRecord {
    let mut stub = [
        0x00, 0x10, 0x9f, 0xe5, // ldr r1, [pc]
        0x31, 0xff, 0x2f, 0xe1, // blx r1
        0, 0, 0, 0, // target address
    ];
    stub[8..12].copy_from_slice(&(target as u32).to_ne_bytes());

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
