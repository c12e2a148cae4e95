//! Snapshot of the auxiliary vector, read directly from `/proc/self/auxv`.
//!
//! Once the startup stack has been rewritten (see `entry::rewrite`), the
//! libc `getauxval()` can no longer be trusted: it caches a pointer into
//! the original stack layout that the shift invalidates, and there is no
//! public API to repair it. Reading the vector straight from the kernel
//! once, before any patch is applied, and mirroring it in owned memory
//! sidesteps the problem entirely.

use crate::error::{PreloaderError, Result};
use std::convert::TryInto;
use std::fs;

pub struct AuxvMirror {
    entries: Vec<(u64, u64)>,
}

impl AuxvMirror {
    pub fn capture() -> Result<AuxvMirror> {
        let bytes = fs::read("/proc/self/auxv")
            .map_err(|e| PreloaderError::Resource(format!("reading /proc/self/auxv: {}", e)))?;

        // `Elf{32,64}_auxv_t` is two native words wide — 4 bytes each on
        // i686/arm, 8 bytes each on x86_64/riscv64. Hardcoding `u64` here
        // would misparse the 32-bit layout: every entry would be read
        // twice as wide as it is and the scan would desync immediately.
        let word = std::mem::size_of::<usize>();
        if bytes.len() % (2 * word) != 0 {
            return Err(PreloaderError::AbiIntegrity(
                "auxv byte length not a multiple of two words".into(),
            ));
        }

        let mut entries = Vec::with_capacity(bytes.len() / (2 * word));
        let mut i = 0;
        while i + 2 * word <= bytes.len() {
            let a_type = usize::from_ne_bytes(bytes[i..i + word].try_into().unwrap()) as u64;
            let a_val =
                usize::from_ne_bytes(bytes[i + word..i + 2 * word].try_into().unwrap()) as u64;
            if a_type == libc::AT_NULL as u64 {
                break;
            }
            entries.push((a_type, a_val));
            i += 2 * word;
        }

        Ok(AuxvMirror { entries })
    }

    pub fn lookup(&self, a_type: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|(t, _)| *t == a_type)
            .map(|(_, v)| *v)
    }

    pub fn entry_point(&self) -> Result<u64> {
        self.lookup(libc::AT_ENTRY as u64)
            .ok_or_else(|| PreloaderError::AbiIntegrity("AT_ENTRY missing from auxv".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_own_auxv_with_entry_point() {
        let mirror = AuxvMirror::capture().expect("reading /proc/self/auxv");
        assert!(mirror.entry_point().is_ok());
    }

    #[test]
    fn lookup_of_missing_type_is_none() {
        let mirror = AuxvMirror { entries: vec![(1, 2)] };
        assert_eq!(mirror.lookup(999), None);
    }
}
