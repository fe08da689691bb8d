//! Demand paging for the kernel heap: virtual pages are handed out first and only get a
//! physical frame when they are touched for the first time.

use core::fmt;

use amd64::{Alignable, PhysAddr, VirtAddr};

use crate::paging::{Flags, Level, MapError, PageTableEntry, PageTables, Tlb};
use crate::physical::alloc::PageFrameAllocator;
use crate::PAGE_SIZE;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReserveError {
    /// Reserving zero pages makes no sense.
    Empty,
    /// The heap window does not have room for the request.
    WindowExhausted,
    /// A page table for the range could not be created.
    Map(MapError),
}

impl fmt::Display for ReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ReserveError::Empty => write!(f, "zero pages requested"),
            ReserveError::WindowExhausted => write!(f, "kernel heap window exhausted"),
            ReserveError::Map(err) => write!(f, "{}", err),
        }
    }
}

impl From<MapError> for ReserveError {
    fn from(err: MapError) -> ReserveError {
        ReserveError::Map(err)
    }
}

/// Why a page fault could not be resolved by demand paging.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnresolvedFault {
    /// No page table reaches the faulting address.
    NoEntry,
    /// The entry exists but was never reserved for demand paging, or is already backed.
    NotDemandPaged(PageTableEntry),
    /// No frame left to back the page.
    OutOfMemory,
}

impl fmt::Display for UnresolvedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            UnresolvedFault::NoEntry => write!(f, "no page table entry"),
            UnresolvedFault::NotDemandPaged(entry) => write!(f, "not a demand page: {:?}", entry),
            UnresolvedFault::OutOfMemory => write!(f, "out of memory during demand paging"),
        }
    }
}

/// Hands out pages of the kernel heap window `[heap_start, heap_end)` from a break pointer
/// that only ever grows.
#[derive(Debug)]
pub struct DemandPager {
    brk: VirtAddr,
    heap_end: VirtAddr,
}

impl DemandPager {
    pub fn new(heap_start: VirtAddr, heap_end: VirtAddr) -> DemandPager {
        DemandPager {
            brk: heap_start.align_up(PAGE_SIZE),
            heap_end: heap_end.align_down(PAGE_SIZE),
        }
    }

    /// The next address `reserve` would return.
    pub fn brk(&self) -> VirtAddr {
        self.brk
    }

    /// Reserve `count` consecutive pages without backing them. Failures are logged and
    /// reported as `None`.
    pub fn reserve<T: Tlb>(&mut self, count: usize, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) -> Option<VirtAddr> {
        match self.try_reserve(count, tables, pfa) {
            Ok(addr) => Some(addr),
            Err(err) => {
                warn!("[VMM] reserving {} pages failed: {}", count, err);
                None
            }
        }
    }

    /// Reserve `count` consecutive pages. Each gets a writable, demand-pending entry that
    /// is not present. If a page table cannot be created, the pages reserved so far are
    /// released again and the break stays where it was.
    pub fn try_reserve<T: Tlb>(&mut self, count: usize, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) -> Result<VirtAddr, ReserveError> {
        if count == 0 {
            return Err(ReserveError::Empty);
        }
        let start = self.brk;
        let fits = count
            .checked_mul(PAGE_SIZE)
            .and_then(|len| start.0.checked_add(len))
            .map_or(false, |end| end <= self.heap_end.0);
        if !fits {
            return Err(ReserveError::WindowExhausted);
        }

        for i in 0..count {
            let vaddr = start + i * PAGE_SIZE;
            match tables.entry_or_create(vaddr, pfa) {
                Ok(entry) => *entry = PageTableEntry::with(PhysAddr(0), Flags::DEMAND | Flags::WRITABLE),
                Err(err) => {
                    release_range(start, i, tables, pfa);
                    // tables created for the failing page before the allocator ran dry
                    tables.reclaim_empty_tables(vaddr, pfa);
                    return Err(err.into());
                }
            }
        }
        self.brk = start + count * PAGE_SIZE;
        trace!("[VMM] reserved {} pages at {:p}", count, start);
        Ok(start)
    }

    pub fn reserve_page<T: Tlb>(&mut self, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) -> Option<VirtAddr> {
        self.reserve(1, tables, pfa)
    }

    /// Unmap `count` pages starting at `vaddr`, returning the frames of pages that were
    /// faulted in and the page tables that became empty.
    pub fn release<T: Tlb>(&mut self, vaddr: VirtAddr, count: usize, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) {
        release_range(vaddr, count, tables, pfa);
    }

    pub fn release_page<T: Tlb>(&mut self, vaddr: VirtAddr, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) {
        self.release(vaddr, 1, tables, pfa)
    }

    /// Back the demand page containing `fault_addr` with a fresh zeroed frame.
    ///
    /// The new entry keeps the protection flags of the reserved one, drops the demand
    /// marker and becomes present. No page tables are created on the way.
    pub fn resolve_fault<T: Tlb>(&mut self, fault_addr: VirtAddr, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) -> Result<PhysAddr, UnresolvedFault> {
        let page = fault_addr.align_down(PAGE_SIZE);
        let entry = tables.entry(page).ok_or(UnresolvedFault::NoEntry)?;
        let old = *entry;
        if !old.demand() || old.present() {
            return Err(UnresolvedFault::NotDemandPaged(old));
        }
        let frame = pfa.alloc().ok_or(UnresolvedFault::OutOfMemory)?.start_address();
        let mut flags = old.flags();
        flags.remove(Flags::DEMAND);
        *entry = PageTableEntry::with(frame, flags | Flags::PRESENT);
        tables.invalidate(page);
        trace!("[VMM] demand page {:p} -> {:p}", page, frame);
        Ok(frame)
    }
}

fn release_range<T: Tlb>(start: VirtAddr, count: usize, tables: &mut PageTables<T>, pfa: &mut dyn PageFrameAllocator) {
    let table_span = Level::PD.page_size();
    for i in 0..count {
        let vaddr = start + i * PAGE_SIZE;
        if let Some(old) = tables.unmap(vaddr) {
            if old.present() {
                // a frame we cannot take back is already reported by the allocator
                let _ = pfa.free(old.base());
            }
        }
        // once per page table: after its last page, or at the end of the range
        let next = vaddr.0.wrapping_add(PAGE_SIZE);
        if i + 1 == count || next.is_aligned(table_span) {
            tables.reclaim_empty_tables(vaddr, pfa);
        }
    }
}
