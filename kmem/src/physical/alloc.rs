//! Single page frame allocation from a free list threaded through the free frames themselves.

use core::cmp;
use core::fmt;
use core::ptr;

use arrayvec::ArrayVec;

use amd64::{Alignable, PhysAddr};

use crate::paging::direct::DirectMapping;
use crate::physical::regions::{MemoryRegions, MAX_REGIONS};
use crate::physical::PageFrame;
use crate::PAGE_SIZE;

/// Generic interface for a page frame allocator.
pub trait PageFrameAllocator {
    /// Allocate a single zeroed page frame.
    fn alloc(&mut self) -> Option<PageFrame>;
    /// Return the page frame starting at `addr` to the allocator.
    fn free(&mut self, addr: PhysAddr) -> Result<(), FreeError>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FreeError {
    Null,
    Misaligned(PhysAddr),
    /// The frame cannot be reached through the direct mapping.
    Unmapped(PhysAddr),
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FreeError::Null => write!(f, "attempt to free the null frame"),
            FreeError::Misaligned(addr) => write!(f, "attempt to free misaligned frame {:p}", addr),
            FreeError::Unmapped(addr) => write!(f, "attempt to free unmapped frame {:p}", addr),
        }
    }
}

/// Marks the end of the free list. Frame zero is never handed out.
const LIST_END: usize = 0;

/// LIFO free list of frames. Each free frame stores the physical address of the next one
/// in its first eight bytes.
///
/// The list is only built on the first allocation, until then the frames are untouched.
pub struct FreeListAllocator {
    /// Available frame ranges, already clamped to the low limit and the direct mapping.
    pending: ArrayVec<(PhysAddr, PhysAddr), MAX_REGIONS>,
    mapping: DirectMapping,
    head: usize,
    free_frames: usize,
    initialized: bool,
}

impl FreeListAllocator {
    /// Allocator over the available `regions`, excluding everything below `low_limit`
    /// and everything that `mapping` does not cover.
    pub fn new(regions: &MemoryRegions, mapping: DirectMapping, low_limit: PhysAddr) -> FreeListAllocator {
        let low_limit = cmp::max(low_limit.align_up(PAGE_SIZE), PhysAddr(PAGE_SIZE));
        let mapped = mapping.physical_range();
        let mut pending = ArrayVec::new();
        let mut free_frames = 0;
        for region in regions.available() {
            let start = cmp::max(cmp::max(region.start, low_limit), mapped.start.align_up(PAGE_SIZE));
            let end = cmp::min(region.end, mapped.end.align_down(PAGE_SIZE));
            if start < end {
                free_frames += (end - start) / PAGE_SIZE;
                pending.push((start, end));
            }
        }
        FreeListAllocator {
            pending,
            mapping,
            head: LIST_END,
            free_frames,
            initialized: false,
        }
    }

    /// Number of frames that can still be allocated.
    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    pub fn mapping(&self) -> &DirectMapping {
        &self.mapping
    }

    fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let pending = core::mem::replace(&mut self.pending, ArrayVec::new());
        for &(start, end) in pending.iter() {
            let mut frame = start;
            while frame < end {
                unsafe { self.push(frame) };
                frame += PAGE_SIZE;
            }
        }
        debug!("[kmem] free list built with {} frames", self.free_frames);
    }

    /// Thread `frame` onto the list. It must be mapped and aligned.
    unsafe fn push(&mut self, frame: PhysAddr) {
        let node: *mut usize = self.mapping.phys_to_virt(frame).as_mut_ptr();
        node.write(self.head);
        self.head = frame.0;
    }
}

impl PageFrameAllocator for FreeListAllocator {
    fn alloc(&mut self) -> Option<PageFrame> {
        self.ensure_initialized();
        if self.head == LIST_END {
            error!("[kmem] out of memory");
            return None;
        }
        let frame = PhysAddr(self.head);
        unsafe {
            let virt = self.mapping.phys_to_virt(frame);
            self.head = virt.as_ptr::<usize>().read();
            ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
        }
        self.free_frames -= 1;
        Some(PageFrame::including(frame))
    }

    fn free(&mut self, addr: PhysAddr) -> Result<(), FreeError> {
        let err = if addr.is_null() {
            FreeError::Null
        } else if !addr.is_aligned(PAGE_SIZE) {
            FreeError::Misaligned(addr)
        } else if !self.mapping.contains_phys(addr) {
            FreeError::Unmapped(addr)
        } else {
            // frames freed before the first allocation end up below the region frames
            self.ensure_initialized();
            unsafe { self.push(addr) };
            self.free_frames += 1;
            return Ok(());
        };
        error!("[kmem] {}", err);
        Err(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testmem::{TestMemory, PHYS_BASE};
    use std::vec::Vec;

    #[test]
    fn lifo_reuse() {
        let mem = TestMemory::new(8);
        let mut pfa = mem.allocator();
        let first = pfa.alloc().unwrap();
        for _ in 0..5 {
            pfa.free(first.start_address()).unwrap();
            assert_eq!(pfa.alloc(), Some(first), "the last freed frame is handed out next");
        }
    }

    #[test]
    fn frames_are_zeroed_and_counted() {
        let mem = TestMemory::new(4);
        let mut pfa = mem.allocator();
        assert_eq!(pfa.free_frames(), 4);
        let frames: Vec<_> = (0..4).map(|_| pfa.alloc().expect("frame")).collect();
        assert_eq!(pfa.free_frames(), 0);
        assert_eq!(pfa.alloc(), None, "exhausted");
        for f in &frames {
            assert!(mem.bytes(f.start_address()).iter().all(|&b| b == 0), "frame {:?} not zeroed", f);
        }
        let mut addrs: Vec<_> = frames.iter().map(|f| f.start_address().0).collect();
        addrs.sort();
        addrs.dedup();
        assert_eq!(addrs.len(), 4, "no frame handed out twice");
    }

    #[test]
    fn reserved_ranges_never_allocated() {
        let mem = TestMemory::new(16);
        let mut regions = mem.regions();
        let kernel = (PhysAddr(PHYS_BASE + 0x3000), PhysAddr(PHYS_BASE + 0x5800));
        regions.reserve(kernel.0, kernel.1);
        let mut pfa = FreeListAllocator::new(&regions, mem.mapping(), PhysAddr(0));
        assert_eq!(pfa.free_frames(), 13);
        while let Some(frame) = pfa.alloc() {
            let a = frame.start_address();
            assert!(a < kernel.0 || a >= PhysAddr(PHYS_BASE + 0x6000), "allocated kernel frame {:p}", a);
            assert!(regions.is_available(a));
        }
    }

    #[test]
    fn low_limit_and_mapping_clamp() {
        let mem = TestMemory::new(8);
        let mut regions = MemoryRegions::new();
        // memory extends past the mapped buffer on both sides
        regions.add_available(0x1000, (mem.end().0 + 0x10_0000) as u64).unwrap();
        let pfa = FreeListAllocator::new(&regions, mem.mapping(), PhysAddr(PHYS_BASE + 0x2000));
        assert_eq!(pfa.free_frames(), 6);
    }

    #[test]
    fn bad_frees_rejected() {
        let mem = TestMemory::new(2);
        let mut pfa = mem.allocator();
        assert_eq!(pfa.free(PhysAddr(0)), Err(FreeError::Null));
        assert_eq!(pfa.free(PhysAddr(PHYS_BASE + 8)), Err(FreeError::Misaligned(PhysAddr(PHYS_BASE + 8))));
        assert_eq!(pfa.free(mem.end()), Err(FreeError::Unmapped(mem.end())));
        assert_eq!(pfa.free_frames(), 2);
    }
}
