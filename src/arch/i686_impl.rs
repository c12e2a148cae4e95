//! `mov $imm32, %eax ; call *%eax` — 7 bytes.
//!
//! Ported from `arch/arch_i386.c`.

use super::PatchRecord;
use std::ptr;

pub const PATCH_LEN: usize = 7;
pub const RETURN_OFFSET: usize = PATCH_LEN;

pub fn patch_start(entry: usize, target: usize) -> PatchRecord {
    let mut stub = [
        0xb8, 0, 0, 0, 0, // mov $imm32, %eax
        0xff, 0xd0, // call *%eax
    ];
    stub[1..5].copy_from_slice(&(target as u32).to_ne_bytes());

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
