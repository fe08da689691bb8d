//! Fake physical memory for host tests: a page aligned heap buffer posing as the
//! physical range starting at 1 MiB.

use std::vec::Vec;

use amd64::{PhysAddr, VirtAddr};

use crate::paging::direct::DirectMapping;
use crate::paging::{PageTables, Tlb};
use crate::physical::alloc::{FreeListAllocator, PageFrameAllocator};
use crate::physical::regions::MemoryRegions;
use crate::PAGE_SIZE;

pub const PHYS_BASE: usize = 0x10_0000;

#[repr(C, align(4096))]
#[derive(Clone)]
pub struct Page([u8; PAGE_SIZE]);

pub struct TestMemory {
    pages: Vec<Page>,
}

impl TestMemory {
    /// `page_count` pages filled with garbage.
    pub fn new(page_count: usize) -> TestMemory {
        TestMemory { pages: vec![Page([0xAA; PAGE_SIZE]); page_count] }
    }

    pub fn mapping(&self) -> DirectMapping {
        DirectMapping::new(VirtAddr(self.pages.as_ptr() as usize), PhysAddr(PHYS_BASE), self.pages.len() * PAGE_SIZE)
    }

    pub fn end(&self) -> PhysAddr {
        PhysAddr(PHYS_BASE + self.pages.len() * PAGE_SIZE)
    }

    /// A single available region covering the whole buffer.
    pub fn regions(&self) -> MemoryRegions {
        let mut regions = MemoryRegions::new();
        regions.add_available(PHYS_BASE as u64, (self.pages.len() * PAGE_SIZE) as u64).unwrap();
        regions
    }

    pub fn allocator(&self) -> FreeListAllocator {
        FreeListAllocator::new(&self.regions(), self.mapping(), PhysAddr(PHYS_BASE))
    }

    pub fn bytes(&self, addr: PhysAddr) -> &[u8] {
        &self.pages[(addr.0 - PHYS_BASE) / PAGE_SIZE].0
    }

    /// Page tables with a fresh root from `pfa`.
    pub fn page_tables(&self, pfa: &mut FreeListAllocator) -> PageTables<RecordingTlb> {
        let root = pfa.alloc().expect("root table");
        unsafe { PageTables::new(root.start_address(), self.mapping(), RecordingTlb::default()) }
    }
}

#[derive(Default)]
pub struct RecordingTlb {
    pub invalidated: Vec<VirtAddr>,
}

impl Tlb for RecordingTlb {
    fn invalidate(&mut self, addr: VirtAddr) {
        self.invalidated.push(addr);
    }
}
