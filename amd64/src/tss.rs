//! The 64-bit task state segment. Only its stack pointer tables are used in long mode.

use crate::addr::VirtAddr;

/// Number of interrupt stack table slots.
pub const IST_SLOTS: usize = 7;

#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct TaskStateSegment {
    reserved0: u32,
    /// Stack pointers loaded on a privilege change to ring 0 to 2.
    privilege_stacks: [u64; 3],
    reserved1: u64,
    /// Interrupt stack table, referenced by IDT entries with slots 1 to 7.
    interrupt_stacks: [u64; IST_SLOTS],
    reserved2: u64,
    reserved3: u16,
    iomap_base: u16,
}

assert_eq_size!(TaskStateSegment, [u8; 104]);

/// An IST slot number was outside of 1 to 7.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InvalidStackIndex(pub u8);

impl TaskStateSegment {
    pub const fn new() -> TaskStateSegment {
        TaskStateSegment {
            reserved0: 0,
            privilege_stacks: [0; 3],
            reserved1: 0,
            interrupt_stacks: [0; IST_SLOTS],
            reserved2: 0,
            reserved3: 0,
            // no I/O permission bitmap
            iomap_base: core::mem::size_of::<TaskStateSegment>() as u16,
        }
    }

    /// Set the stack the CPU switches to for gates referencing IST slot `index` (1 to 7).
    /// `top` is the first byte past the stack, it grows downwards from there.
    pub fn set_interrupt_stack(&mut self, index: u8, top: VirtAddr) -> Result<(), InvalidStackIndex> {
        if index == 0 || index as usize > IST_SLOTS {
            return Err(InvalidStackIndex(index));
        }
        let mut stacks = self.interrupt_stacks;
        stacks[index as usize - 1] = top.0 as u64;
        self.interrupt_stacks = stacks;
        Ok(())
    }

    pub fn interrupt_stack(&self, index: u8) -> Option<VirtAddr> {
        if index == 0 || index as usize > IST_SLOTS {
            return None;
        }
        let stacks = self.interrupt_stacks;
        Some(VirtAddr(stacks[index as usize - 1] as usize))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ist_slots_are_one_based() {
        let mut tss = TaskStateSegment::new();
        assert_eq!(tss.set_interrupt_stack(0, VirtAddr(0x1000)), Err(InvalidStackIndex(0)));
        assert_eq!(tss.set_interrupt_stack(8, VirtAddr(0x1000)), Err(InvalidStackIndex(8)));
        tss.set_interrupt_stack(1, VirtAddr(0x5000)).unwrap();
        tss.set_interrupt_stack(7, VirtAddr(0x9000)).unwrap();
        assert_eq!(tss.interrupt_stack(1), Some(VirtAddr(0x5000)));
        assert_eq!(tss.interrupt_stack(7), Some(VirtAddr(0x9000)));
        assert_eq!(tss.interrupt_stack(2), Some(VirtAddr(0)));
    }

    #[test]
    fn ist_field_offsets() {
        let mut tss = TaskStateSegment::new();
        tss.set_interrupt_stack(1, VirtAddr(0x1122_3344_5566_7788)).unwrap();
        let raw: [u8; 104] = unsafe { core::mem::transmute(tss) };
        // IST1 lives at byte offset 0x24
        assert_eq!(&raw[0x24..0x2C], &0x1122_3344_5566_7788_u64.to_le_bytes());
        assert_eq!(u16::from_le_bytes([raw[102], raw[103]]), 104);
    }
}
