//! Privileged instructions that do not belong to a particular hardware structure.

use core::arch::asm;

use crate::addr::PhysAddr;

/// Pause the CPU until the next interrupt arrives.
#[inline]
pub unsafe fn hlt() {
    asm!("hlt", options(nomem, nostack));
}

/// Disable interrupts and halt forever. Used for unrecoverable conditions.
pub fn halt_forever() -> ! {
    loop {
        unsafe {
            asm!("cli; hlt", options(nomem, nostack));
        }
    }
}

#[inline]
pub unsafe fn enable_interrupts() {
    asm!("sti", options(nomem, nostack));
}

#[inline]
pub unsafe fn disable_interrupts() {
    asm!("cli", options(nomem, nostack));
}

const RFLAGS_IF: u64 = 1 << 9;

/// Whether the interrupt flag is set in RFLAGS.
#[inline]
pub fn interrupts_enabled() -> bool {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags & RFLAGS_IF != 0
}

/// Run `f` with interrupts disabled, restoring the previous interrupt flag afterwards.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
    where F: FnOnce() -> R
{
    let were_enabled = interrupts_enabled();
    if were_enabled {
        unsafe { disable_interrupts() };
    }
    let result = f();
    if were_enabled {
        unsafe { enable_interrupts() };
    }
    result
}

/// The linear address that caused the most recent page fault.
#[inline]
pub fn read_cr2() -> usize {
    let value: usize;
    unsafe {
        asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Physical address of the active top-level page table.
#[inline]
pub fn read_cr3() -> PhysAddr {
    let value: usize;
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    PhysAddr(value & 0x000F_FFFF_FFFF_F000)
}

/// Raise software interrupt `0x20`, the vector of the timer line after the usual PIC remapping.
#[inline]
pub unsafe fn int_0x20() {
    asm!("int 0x20", options(nomem, nostack));
}
