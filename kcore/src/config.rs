//! Hardcoded layout of the kernel.
//!
//! The boot code identity maps the lowest `IDENTITY_MAP_SIZE` bytes of physical memory and
//! loads the kernel at 1 MiB. Everything the kernel allocates afterwards lives in this window.
//!
//! # Virtual memory layout
//!
//! - `0x0000_0000_0000` PML4 slot 0, identity mapping of low physical memory
//! - `0x0100_0000_0000` PML4 slot 2, kernel heap (demand paged)
//! - `0x0200_0000_0000` PML4 slot 4, scratch pages of the self test

use amd64::{PhysAddr, VirtAddr};

/// Vector of IRQ line 0 after remapping the master PIC.
pub const PIC_MASTER_BASE: u8 = 0x20;
/// Vector of IRQ line 8 after remapping the slave PIC.
pub const PIC_SLAVE_BASE: u8 = 0x28;

/// Size of each of the dedicated fault stacks.
pub const GUARD_STACK_SIZE: usize = 16 * 1024;

pub const DOUBLE_FAULT_IST: u8 = 1;
pub const PAGE_FAULT_IST: u8 = 2;
pub const GENERAL_PROTECTION_IST: u8 = 3;

/// Frames below this address are left to the firmware and the boot code.
pub const LOW_MEMORY_LIMIT: PhysAddr = PhysAddr(0x10_0000);

/// Amount of physical memory the boot code identity maps.
pub const IDENTITY_MAP_SIZE: usize = 1024 * 1024 * 1024;

pub const KERNEL_HEAP_START: VirtAddr = VirtAddr(0x100_0000_0000);
pub const KERNEL_HEAP_END: VirtAddr = VirtAddr(0x200_0000_0000);

pub const SELFTEST_SCRATCH: VirtAddr = VirtAddr(0x200_0000_0000);
