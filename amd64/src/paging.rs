//! Page table entries of the 4-level AMD64 paging hierarchy.

use core::arch::asm;
use core::fmt;

use crate::addr::{PhysAddr, VirtAddr};

/// Size of a base page and of a page table.
pub const PAGE_SIZE: usize = 4096;

/// Number of entries in each page table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// An entry in a page table.
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

bitflags! {
    pub struct Flags : u64 {
        const PRESENT    = 1 << 0;
        const WRITABLE   = 1 << 1;
        const USER       = 1 << 2;
        const PWT        = 1 << 3;
        const PCD        = 1 << 4;
        const ACCESSED   = 1 << 5;
        const DIRTY      = 1 << 6;
        /// Maps a 2 MiB or 1 GiB page instead of pointing to a table.
        /// Must be zero in the PML4.
        const HUGE       = 1 << 7;
        const GLOBAL     = 1 << 8;
        /// Software bit: no frame yet, allocate one on first access.
        const DEMAND     = 1 << 9;
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageTableEntry {
    // mask for valid physical base addresses
    pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    pub const fn new() -> Self {
        PageTableEntry(0)
    }

    pub const fn from_raw(raw: u64) -> Self {
        PageTableEntry(raw)
    }

    /// Entry pointing at `base` with the given flags. `base` is aligned down if necessary.
    pub fn with(base: PhysAddr, flags: Flags) -> Self {
        PageTableEntry((base.0 as u64 & Self::ADDR_MASK) | flags.bits())
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_unused(&self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.0)
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.0 = (self.0 & Self::ADDR_MASK) | flags.bits();
    }

    pub fn present(&self) -> bool {
        self.flags().contains(Flags::PRESENT)
    }

    pub fn huge(&self) -> bool {
        self.flags().contains(Flags::HUGE)
    }

    pub fn demand(&self) -> bool {
        self.flags().contains(Flags::DEMAND)
    }

    /// Return the physical page address of the page or page table pointed to by this entry.
    pub fn base(&self) -> PhysAddr {
        PhysAddr((self.0 & Self::ADDR_MASK) as usize)
    }

    /// Set the physical base address in this entry.
    /// The address is aligned downwards if necessary.
    pub fn set_base(&mut self, addr: PhysAddr) {
        self.0 = (self.0 & !Self::ADDR_MASK) | (addr.0 as u64 & Self::ADDR_MASK);
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTableEntry({:#x}, {:?})", self.base().0, self.flags())
    }
}

/// Drop the TLB entry of the page containing `addr`.
#[inline]
pub unsafe fn invalidate_tlb_address(addr: VirtAddr) {
    asm!("invlpg [{}]", in(reg) addr.0, options(nostack, preserves_flags));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_table_entry_accessors() {
        let mut pte = PageTableEntry::new();
        assert!(pte.is_unused());

        let flags = Flags::PRESENT | Flags::HUGE | Flags::USER | Flags::NO_EXECUTE;
        let addr = PhysAddr(0x0008_0F7A_BA02_1000);

        pte.set_flags(flags);
        pte.set_base(addr);

        assert_eq!(pte.flags(), flags, "flag roundtrip failed");
        assert_eq!(pte.base(), addr, "addr roundtrip failed");

        // set fields in a different order now
        pte.set_flags(Flags::DEMAND | Flags::WRITABLE);
        assert_eq!(pte.base(), addr, "set_flags must keep the base");
        assert!(pte.demand() && !pte.present());
    }

    #[test]
    fn base_is_masked() {
        let pte = PageTableEntry::with(PhysAddr(0xFFF0_0000_1234_5FFF), Flags::PRESENT);
        assert_eq!(pte.base(), PhysAddr(0x0000_0000_1234_5000));
        assert_eq!(pte.raw(), 0x1234_5001);
    }
}
