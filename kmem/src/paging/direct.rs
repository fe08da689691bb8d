use amd64::{PhysAddr, PhysAddrRange, VirtAddr};

/// A window of physical memory that is mapped linearly into the virtual address space.
///
/// Page tables and free frames are only ever touched through such a window, so this
/// is also what the host tests replace with an ordinary heap buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMapping {
    frames: PhysAddrRange,
    window: VirtAddr,
}

impl DirectMapping {
    /// Map `size` bytes starting at `physical_base` to `virtual_base`.
    pub fn new(virtual_base: VirtAddr, physical_base: PhysAddr, size: usize) -> Self {
        DirectMapping {
            frames: PhysAddrRange::new(physical_base, size),
            window: virtual_base,
        }
    }

    /// The physical memory reachable through this mapping.
    pub fn physical_range(&self) -> PhysAddrRange {
        self.frames
    }

    pub fn contains_phys(&self, addr: PhysAddr) -> bool {
        self.frames.contains(addr)
    }

    pub fn try_phys_to_virt(&self, addr: PhysAddr) -> Option<VirtAddr> {
        if self.contains_phys(addr) {
            Some(self.window + (addr - self.frames.start))
        } else {
            None
        }
    }

    /// Like `try_phys_to_virt`, for addresses the caller already checked.
    ///
    /// # Panics
    ///
    /// Panics if `addr` lies outside the mapping.
    pub fn phys_to_virt(&self, addr: PhysAddr) -> VirtAddr {
        match self.try_phys_to_virt(addr) {
            Some(virt) => virt,
            None => panic!("[kmem] {:p} is outside the direct mapping", addr),
        }
    }
}
