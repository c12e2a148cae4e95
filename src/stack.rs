//! Typed view over the host's startup stack frame, as seen from the
//! trampoline the arch patch calls into.
//!
//! The layout mirrors what `_start` expects to find above its own return
//! address on entry: `[ret_addr, argc, argv[0], argv[1], ..., NULL, envp...,
//! NULL, auxv...]`. The trampoline hands `preloader_land` the stack pointer
//! already sitting at the return slot — the stub pushes no scratch words of
//! its own above it — so `argc` is one word above the return slot, not two.
//! We never hold this as a Rust slice reference since the memory above the
//! trampoline's frame is host-owned and its true extent isn't known until
//! we've scanned for it.

use std::mem::size_of;

/// Bounded window used to locate the host's return address among the
/// first stack slots above the trampoline call, matching `MAX_LOOKUP` in
/// the original.
pub const MAX_LOOKUP: usize = 15;

pub struct StartupStack {
    base: *mut usize,
}

impl StartupStack {
    /// `base` must point at the stack slot holding the return address the
    /// patched entrypoint's call instruction pushed.
    pub unsafe fn from_return_slot(base: *mut usize) -> StartupStack {
        StartupStack { base }
    }

    /// Scans up to `MAX_LOOKUP` slots above `sp` for a value equal to
    /// `expected_return`, returning a stack view anchored at that slot.
    /// Returns `None` if the host's stack layout doesn't match what the
    /// patch assumed — a sign the stub or arch backend mismatched.
    pub unsafe fn locate(sp: *mut usize, expected_return: usize) -> Option<StartupStack> {
        for i in 0..MAX_LOOKUP {
            let slot = sp.add(i);
            if *slot == expected_return {
                return Some(StartupStack { base: slot });
            }
        }
        None
    }

    #[inline]
    fn slot(&self, index: isize) -> *mut usize {
        unsafe { self.base.offset(index) }
    }

    pub fn return_slot(&self) -> *mut usize {
        self.slot(0)
    }

    pub fn argc_slot(&self) -> *mut usize {
        self.slot(1)
    }

    pub unsafe fn argc(&self) -> usize {
        *self.argc_slot()
    }

    pub unsafe fn set_argc(&self, argc: usize) {
        *self.argc_slot() = argc;
    }

    /// Address of `argv[i]`, counting from the slot after `argc`.
    pub fn argv_slot(&self, i: usize) -> *mut usize {
        self.slot(2 + i as isize)
    }

    pub unsafe fn set_argv(&self, i: usize, ptr: *const u8) {
        *(self.argv_slot(i) as *mut *const u8) = ptr;
    }

    pub unsafe fn adjust_return_address(&self, delta: usize) {
        let slot = self.return_slot();
        *slot -= delta;
    }
}

pub const WORD: usize = size_of::<usize>();
