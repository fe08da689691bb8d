//! This module provides functionality for manipulating page tables.
//!
//! All tables are accessed through a `DirectMapping` of the physical memory they live in.

pub mod direct;

use core::fmt;
use core::ops;

pub use amd64::paging::{Flags, PageTableEntry, ENTRIES_PER_TABLE};
use amd64::{PhysAddr, VirtAddr};

use self::direct::DirectMapping;
use crate::physical::alloc::PageFrameAllocator;
use crate::PAGE_ALIGN_BITS;

/// Index of a level in the page table hierarchy. 0 represents the lowest level (4K pages).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level(pub u32);

impl Level {
    /// Page Table level
    pub const PT: Level = Level(0);
    /// Page Directory level
    pub const PD: Level = Level(1);
    /// Page Directory Pointer level
    pub const PDP: Level = Level(2);
    /// Page Map Table Level 4 level
    pub const PML4: Level = Level(3);

    /// The parent level in the page table hierarchy.
    pub fn parent(&self) -> Option<Level> {
        if *self == Level::PML4 {
            None
        } else {
            Some(Level(self.0 + 1))
        }
    }

    /// The child level in the page table hierarchy, if the current level is not the leaf level (0).
    pub fn child(&self) -> Option<Level> {
        if self.0 == 0 {
            None
        } else {
            Some(Level(self.0 - 1))
        }
    }

    /// Number of bytes mapped by a single entry at this level.
    pub fn page_size(&self) -> usize {
        1 << (PAGE_ALIGN_BITS + INDEX_BIT_WIDTH * self.0)
    }
}

/// Mask for extracting the 9-bit index into a page table.
const INDEX_MASK: usize = 0x1FF;
/// Width of the index in bits.
const INDEX_BIT_WIDTH: u32 = 9;

/// A slot in a page table. Always below 512.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableIndex(u16);

impl TableIndex {
    pub fn new(index: u16) -> Option<TableIndex> {
        if (index as usize) < ENTRIES_PER_TABLE {
            Some(TableIndex(index))
        } else {
            None
        }
    }

    /// Return the index in the page table at the given level (0 is PT, 3 is PML4)
    /// that is responsible for mapping the given virtual address.
    pub fn at_level(level: Level, vaddr: VirtAddr) -> TableIndex {
        TableIndex(((vaddr.0 >> (PAGE_ALIGN_BITS + INDEX_BIT_WIDTH * level.0)) & INDEX_MASK) as u16)
    }

    pub fn value(&self) -> usize {
        self.0 as usize
    }
}

/// One page table of any level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

assert_eq_size!(PageTable, [u8; 4096]);

impl PageTable {
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_unused())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }
}

impl ops::Index<TableIndex> for PageTable {
    type Output = PageTableEntry;

    fn index(&self, idx: TableIndex) -> &PageTableEntry {
        &self.entries[idx.value()]
    }
}

impl ops::IndexMut<TableIndex> for PageTable {
    fn index_mut(&mut self, idx: TableIndex) -> &mut PageTableEntry {
        &mut self.entries[idx.value()]
    }
}

/// Drops cached translations after a page table entry changed.
pub trait Tlb {
    fn invalidate(&mut self, addr: VirtAddr);
}

/// The TLB of the executing CPU.
#[derive(Debug, Default, Copy, Clone)]
pub struct HardwareTlb;

impl Tlb for HardwareTlb {
    fn invalidate(&mut self, addr: VirtAddr) {
        unsafe { amd64::paging::invalidate_tlb_address(addr) }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MapError {
    /// There is no memory left for allocating new page tables.
    OutOfMemory,
    /// A huge page at the given level already covers the address.
    HugePage(Level),
    /// A page table lies outside of the direct mapping.
    Unreachable(PhysAddr),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MapError::OutOfMemory => write!(f, "out of memory for page tables"),
            MapError::HugePage(level) => write!(f, "address covered by a huge page at level {}", level.0),
            MapError::Unreachable(addr) => write!(f, "page table {:p} outside of the direct mapping", addr),
        }
    }
}

/// A 4-level page table hierarchy, identified by the physical address of its PML4.
pub struct PageTables<T> {
    root: PhysAddr,
    mapping: DirectMapping,
    tlb: T,
}

impl PageTables<HardwareTlb> {
    /// The hierarchy currently loaded in CR3.
    ///
    /// All of its tables must be covered by `mapping`.
    pub unsafe fn active(mapping: DirectMapping) -> PageTables<HardwareTlb> {
        PageTables::new(amd64::cpu::read_cr3(), mapping, HardwareTlb)
    }
}

impl<T: Tlb> PageTables<T> {
    /// Wrap the hierarchy rooted at `root`, which must be a valid, mapped page table.
    pub unsafe fn new(root: PhysAddr, mapping: DirectMapping, tlb: T) -> PageTables<T> {
        PageTables { root, mapping, tlb }
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    pub fn tlb(&self) -> &T {
        &self.tlb
    }

    pub fn invalidate(&mut self, vaddr: VirtAddr) {
        self.tlb.invalidate(vaddr);
    }

    /// The table at physical address `addr`, if the direct mapping reaches it.
    fn table(&self, addr: PhysAddr) -> Option<&PageTable> {
        self.mapping
            .try_phys_to_virt(addr)
            .map(|virt| unsafe { &*virt.as_ptr::<PageTable>() })
    }

    /// Like `table`, for writing. Borrowing `self` mutably keeps two of these from aliasing.
    fn table_mut(&mut self, addr: PhysAddr) -> Option<&mut PageTable> {
        self.mapping
            .try_phys_to_virt(addr)
            .map(|virt| unsafe { &mut *virt.as_mut_ptr::<PageTable>() })
    }

    /// Resolve a virtual address to the physical address it is mapped to.
    ///
    /// Huge pages at the PDP and PD level end the walk early.
    pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let mut level = Level::PML4;
        let mut table = self.table(self.root)?;
        loop {
            let entry = table[TableIndex::at_level(level, vaddr)];
            if !entry.present() {
                return None;
            }
            if level == Level::PT || (entry.huge() && level <= Level::PDP) {
                let offset_mask = level.page_size() - 1;
                return Some(PhysAddr((entry.base().0 & !offset_mask) + (vaddr.0 & offset_mask)));
            }
            level = level.child()?;
            table = self.table(entry.base())?;
        }
    }

    /// Physical address of the PT covering `vaddr`, if all tables above it exist.
    fn page_table_of(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let mut addr = self.root;
        for &level in &[Level::PML4, Level::PDP, Level::PD] {
            let entry = self.table(addr)?[TableIndex::at_level(level, vaddr)];
            if !entry.present() || entry.huge() {
                return None;
            }
            addr = entry.base();
        }
        Some(addr)
    }

    /// The PT entry of `vaddr`, without creating missing tables.
    pub fn entry(&mut self, vaddr: VirtAddr) -> Option<&mut PageTableEntry> {
        let pt = self.page_table_of(vaddr)?;
        let table = self.table_mut(pt)?;
        Some(&mut table[TableIndex::at_level(Level::PT, vaddr)])
    }

    /// The PT entry of `vaddr`. Missing tables are allocated from `pfa`, zeroed, and linked
    /// in as present and writable.
    pub fn entry_or_create(&mut self, vaddr: VirtAddr, pfa: &mut dyn PageFrameAllocator) -> Result<&mut PageTableEntry, MapError> {
        let mut addr = self.root;
        for &level in &[Level::PML4, Level::PDP, Level::PD] {
            let index = TableIndex::at_level(level, vaddr);
            let table = self.table_mut(addr).ok_or(MapError::Unreachable(addr))?;
            let entry = &mut table[index];
            if entry.present() && entry.huge() {
                return Err(MapError::HugePage(level));
            }
            if !entry.present() {
                let frame = pfa.alloc().ok_or(MapError::OutOfMemory)?;
                trace!("[VMM] new table at {:p} below level {}", frame.start_address(), level.0);
                // the allocator hands out zeroed frames
                *entry = PageTableEntry::with(frame.start_address(), Flags::PRESENT | Flags::WRITABLE);
            }
            addr = entry.base();
        }
        let table = self.table_mut(addr).ok_or(MapError::Unreachable(addr))?;
        Ok(&mut table[TableIndex::at_level(Level::PT, vaddr)])
    }

    /// Map the 4K page at `vaddr` to `paddr`, replacing any previous mapping.
    pub fn map(&mut self, vaddr: VirtAddr, paddr: PhysAddr, flags: Flags, pfa: &mut dyn PageFrameAllocator) -> Result<(), MapError> {
        trace!("[VMM] map({:p}, {:p})", vaddr, paddr);
        let entry = self.entry_or_create(vaddr, pfa)?;
        *entry = PageTableEntry::with(paddr, flags | Flags::PRESENT);
        self.tlb.invalidate(vaddr);
        Ok(())
    }

    /// Clear the PT entry of `vaddr` and return what it was. Absent mappings are left alone.
    pub fn unmap(&mut self, vaddr: VirtAddr) -> Option<PageTableEntry> {
        let entry = self.entry(vaddr)?;
        if entry.is_unused() {
            return None;
        }
        let old = *entry;
        entry.clear();
        self.tlb.invalidate(vaddr);
        Some(old)
    }

    /// Free the PT, PD and PDP tables on the path to `vaddr` that no longer contain any entry,
    /// lowest level first. The PML4 is never freed. Returns the number of freed tables.
    pub fn reclaim_empty_tables(&mut self, vaddr: VirtAddr, pfa: &mut dyn PageFrameAllocator) -> usize {
        // path[i] is the table at level 3 - i
        let mut path = [PhysAddr(0); 4];
        path[0] = self.root;
        let mut depth = 1;
        for &level in &[Level::PML4, Level::PDP, Level::PD] {
            let entry = match self.table(path[depth - 1]) {
                Some(table) => table[TableIndex::at_level(level, vaddr)],
                None => break,
            };
            if !entry.present() || entry.huge() {
                break;
            }
            path[depth] = entry.base();
            depth += 1;
        }

        let mut freed = 0;
        // walk back up, the parent of path[i] is path[i - 1]
        for i in (1..depth).rev() {
            let empty = self.table(path[i]).map_or(false, |t| t.is_empty());
            if !empty {
                break;
            }
            let parent_level = Level(4 - i as u32);
            if let Some(parent) = self.table_mut(path[i - 1]) {
                parent[TableIndex::at_level(parent_level, vaddr)].clear();
            }
            if pfa.free(path[i]).is_err() {
                break;
            }
            freed += 1;
        }
        if freed > 0 {
            trace!("[VMM] reclaimed {} tables below {:p}", freed, vaddr);
        }
        freed
    }
}
