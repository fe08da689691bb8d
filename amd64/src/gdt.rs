//! Global descriptor table with the flat long mode segments and a TSS descriptor.

use core::arch::asm;
use core::mem;

use crate::segments::{Ring, Selector};
use crate::tss::TaskStateSegment;

/// A raw 8 byte descriptor slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Descriptor(pub u64);

impl Descriptor {
    pub const NULL: Descriptor = Descriptor(0);

    const fn segment(access: u8, flags: u8) -> Descriptor {
        // base 0, limit 0xFFFFF; the CPU ignores both for code and data in long mode
        Descriptor(0xFFFF | (0xF << 48) | ((access as u64) << 40) | (((flags as u64) & 0xF0) << 48))
    }

    /// Present, ring 0, executable, readable, long mode.
    pub const fn kernel_code() -> Descriptor {
        Self::segment(0x9A, 0xA0)
    }

    /// Present, ring 0, writable data.
    pub const fn kernel_data() -> Descriptor {
        Self::segment(0x92, 0xC0)
    }

    /// The two slots describing an available 64-bit TSS at `base`.
    pub fn tss(base: u64, limit: u32) -> (Descriptor, Descriptor) {
        let limit = limit as u64;
        let low = (limit & 0xFFFF)
            | ((base & 0xFF_FFFF) << 16)
            | (0x89 << 40)
            | (((limit >> 16) & 0xF) << 48)
            | (((base >> 24) & 0xFF) << 56);
        let high = base >> 32;
        (Descriptor(low), Descriptor(high))
    }
}

/// Number of slots: null, kernel code, kernel data and the two TSS halves.
pub const GDT_SLOTS: usize = 5;

pub const KERNEL_CODE_SELECTOR: Selector = Selector::new(1, Ring::RING0);
pub const KERNEL_DATA_SELECTOR: Selector = Selector::new(2, Ring::RING0);
pub const TSS_SELECTOR: Selector = Selector::new(3, Ring::RING0);

#[repr(C, align(16))]
pub struct Gdt {
    entries: [Descriptor; GDT_SLOTS],
}

impl Gdt {
    /// A GDT with the code and data segments but an empty TSS descriptor.
    pub const fn new() -> Gdt {
        Gdt {
            entries: [
                Descriptor::NULL,
                Descriptor::kernel_code(),
                Descriptor::kernel_data(),
                Descriptor::NULL,
                Descriptor::NULL,
            ],
        }
    }

    pub fn set_tss(&mut self, tss: &'static TaskStateSegment) {
        let base = tss as *const TaskStateSegment as u64;
        let (low, high) = Descriptor::tss(base, mem::size_of::<TaskStateSegment>() as u32 - 1);
        self.entries[TSS_SELECTOR.index() as usize] = low;
        self.entries[TSS_SELECTOR.index() as usize + 1] = high;
    }

    pub fn entries(&self) -> &[Descriptor] {
        &self.entries
    }

    /// Load this GDT, reload all segment registers and the task register.
    ///
    /// The TSS descriptor must have been set before.
    pub unsafe fn load(&'static self) {
        let gdtr = DescriptorTablePointer {
            limit: (mem::size_of::<Gdt>() - 1) as u16,
            base: self as *const Gdt as u64,
        };
        asm!("lgdt [{}]", in(reg) &gdtr, options(readonly, nostack, preserves_flags));

        // CS can only be changed by a far return
        asm!(
            "push {code}",
            "lea {tmp}, [rip + 2f]",
            "push {tmp}",
            "retfq",
            "2:",
            "mov ds, {data:e}",
            "mov es, {data:e}",
            "mov ss, {data:e}",
            "ltr {tss:x}",
            code = in(reg) KERNEL_CODE_SELECTOR.0 as u64,
            tmp = out(reg) _,
            data = in(reg) KERNEL_DATA_SELECTOR.0 as u32,
            tss = in(reg) TSS_SELECTOR.0,
        );
        log::trace!("[GDT] loaded at {:p}", self);
    }
}

/// Operand of `lgdt` and `lidt`.
#[repr(C, packed)]
pub struct DescriptorTablePointer {
    pub limit: u16,
    pub base: u64,
}

assert_eq_size!(DescriptorTablePointer, [u8; 10]);
