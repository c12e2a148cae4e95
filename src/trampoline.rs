//! The raw landing pad the patched entrypoint calls into, and the
//! matching epilogue that jumps back into the host's restored `_start`.
//!
//! `arch::patch` embeds the address of [`target_address`] as the stub's
//! call target. When the host's own `_start` runs, it executes the stub
//! instead of its first few real instructions, which calls here with the
//! return address (back into `_start`, past the stub) sitting on top of
//! the stack exactly where a normal `call` leaves it, and with the
//! ABI-relevant register the stub preserved (the atexit-handler pointer
//! `_start` expects on entry, per libc's calling convention) still live.
//!
//! Neither landing nor resuming can be expressed as ordinary Rust control
//! flow: `preloader_land` runs the daemon's whole accept loop and never
//! returns for the process that first reaches it; the only way back into
//! unmodified host code is `reenter_host`, which overwrites the current
//! stack pointer with the address of the (already corrected) return slot
//! on the host's own stack and jumps into it — collapsing every Rust
//! frame built up since `preloader_land` was entered in one step.

use crate::daemon;
use crate::stack::StartupStack;

/// Called from the arch-specific stub with the current stack pointer and
/// the register the ABI requires `_start` to still observe on resumption
/// (the atexit-handler pointer on x86_64/arm/riscv64; unused on i686,
/// where `_start` takes no register arguments).
///
/// Runs the daemon's full accept loop. The initial host process that
/// first reaches the patched entrypoint becomes the daemon and never
/// returns from this call: every subsequent "run" the outside world sees
/// is a forked child that reaches [`reenter_host`] instead, so this
/// function's return type reflects that neither path comes back to the
/// stub's `ret`.
///
/// # Safety
/// Must only ever be reached by the patched stub, never called directly.
#[no_mangle]
pub unsafe extern "C" fn preloader_land(sp: *mut usize, abi_reg: usize) -> ! {
    daemon::serve_from_entrypoint(sp, abi_reg)
}

/// Restores `abi_reg` into the register `_start` expects it in and jumps
/// to the address written into `stack`'s return slot by `entry::finish`.
/// Never returns: by design this either lands inside the host's original,
/// now-unpatched `_start`, or — if the stack/patch bookkeeping above it
/// was wrong — crashes, which is the correct failure mode for a corrupted
/// re-entry rather than silently continuing.
///
/// # Safety
/// `stack`'s return slot must already hold the corrected jump target
/// (see `entry::finish`), and must live on a stack region that is still
/// mapped and has not been touched since `stack` was located.
pub unsafe fn reenter_host(stack: &StartupStack, abi_reg: usize) -> ! {
    isa_reenter(stack, abi_reg)
}

#[cfg(target_arch = "x86_64")]
unsafe fn isa_reenter(stack: &StartupStack, abi_reg: usize) -> ! {
    core::arch::asm!(
        "mov rsp, {sp}",
        "mov rdx, {reg}",
        "ret",
        sp = in(reg) stack.return_slot(),
        reg = in(reg) abi_reg,
        options(noreturn)
    );
}

#[cfg(target_arch = "x86")]
unsafe fn isa_reenter(stack: &StartupStack, _abi_reg: usize) -> ! {
    // cdecl `_start` takes no register arguments; only %esp needs fixing.
    core::arch::asm!(
        "mov esp, {sp}",
        "ret",
        sp = in(reg) stack.return_slot(),
        options(noreturn)
    );
}

#[cfg(target_arch = "arm")]
unsafe fn isa_reenter(stack: &StartupStack, abi_reg: usize) -> ! {
    core::arch::asm!(
        "mov sp, {sp}",
        "mov r0, {reg}",
        "bx lr",
        sp = in(reg) stack.return_slot(),
        reg = in(reg) abi_reg,
        lr = out(reg) _,
        options(noreturn)
    );
}

#[cfg(target_arch = "riscv64")]
unsafe fn isa_reenter(stack: &StartupStack, abi_reg: usize) -> ! {
    core::arch::asm!(
        "mv sp, {sp}",
        "mv a0, {reg}",
        "ret",
        sp = in(reg) stack.return_slot(),
        reg = in(reg) abi_reg,
        options(noreturn)
    );
}

// Every ISA needs its own thin asm wrapper here, not just x86_64: the arch
// stub jumps/calls straight into whatever address `target_address()` hands
// `arch::patch`, with the host's current stack pointer sitting in the SP
// register (never passed as an argument register by the stub itself) and
// the stub's one preserved ABI register (`abi_reg`) wherever that ISA's
// `_start` convention keeps it. `preloader_land` is an ordinary `extern
// "C"` function expecting `(sp, abi_reg)` as its first two arguments per
// that ISA's own calling convention, which is a *different* pair of
// registers (or, on i686, stack slots instead of registers at all) than
// what the stub hands off. Each wrapper below exists solely to move values
// between those two conventions before the Rust-side call, and to do so
// before any Rust-generated prologue gets a chance to clobber them.

#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    "
    .global preloader_trampoline_entry
    preloader_trampoline_entry:
        mov rdi, rsp
        mov rsi, rdx
        call preloader_land
        ud2
    "
);

#[cfg(target_arch = "x86")]
core::arch::global_asm!(
    "
    .global preloader_trampoline_entry
    preloader_trampoline_entry:
        mov eax, esp
        push 0
        push eax
        call preloader_land
        ud2
    "
);

// arm/riscv64 reach this wrapper via `blx`/`jalr`, which set `lr`/`ra` to
// the return address but never write it to memory the way x86's `call`
// does. `StartupStack::locate` only ever scans memory, so the first thing
// both wrappers do is spill the just-set link register onto the stack,
// before the `bl`/`call` into `preloader_land` gets a chance to clobber
// it — mirroring, by hand, what the x86 stubs get for free from their own
// `call` instruction.

#[cfg(target_arch = "arm")]
core::arch::global_asm!(
    "
    .global preloader_trampoline_entry
    preloader_trampoline_entry:
        push {{lr}}
        mov r1, r0
        mov r0, sp
        bl preloader_land
        udf #0
    "
);

#[cfg(target_arch = "riscv64")]
core::arch::global_asm!(
    "
    .global preloader_trampoline_entry
    preloader_trampoline_entry:
        addi sp, sp, -8
        sd ra, 0(sp)
        mv a1, a0
        mv a0, sp
        call preloader_land
        unimp
    "
);

extern "C" {
    /// Symbol address handed to `arch::patch` as the stub's call target:
    /// the per-ISA wrapper above, which marshals `(sp, abi_reg)` into the
    /// registers `preloader_land` expects them in before calling it.
    pub fn preloader_trampoline_entry();
}

/// Returns the function pointer that should be embedded as the stub's
/// call target for the current architecture.
pub fn target_address() -> usize {
    preloader_trampoline_entry as usize
}
