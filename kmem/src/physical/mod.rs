use amd64::{Alignable, PhysAddr};
use core::ops;
use crate::{PAGE_SIZE, PAGE_ALIGN_BITS};

pub mod alloc;
pub mod regions;

/// Number of a physical page frame, counted from the start.
/// The first page frame at physical address 0x0 has number zero.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct PageFrame(pub usize);

impl PageFrame {
    /// Return the next page frame starting at or above the given physical address.
    pub fn next_above(addr: PhysAddr) -> PageFrame {
        PageFrame(addr.align_up(PAGE_SIZE).0 >> PAGE_ALIGN_BITS)
    }

    /// Return the page frame including the given physical address.
    pub fn including(addr: PhysAddr) -> PageFrame {
        PageFrame(addr.align_down(PAGE_SIZE).0 >> PAGE_ALIGN_BITS)
    }

    pub fn start_address(&self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_ALIGN_BITS)
    }

    pub fn end_address(&self) -> PhysAddr {
        self.start_address() + PAGE_SIZE
    }
}

impl ops::Add<usize> for PageFrame {
    type Output = PageFrame;

    fn add(self, rhs: usize) -> PageFrame {
        PageFrame(self.0 + rhs)
    }
}

#[cfg(test)]
mod test {
    use amd64::PhysAddr;
    use super::PageFrame;

    #[test]
    fn test_page_frame_rounding() {
        let a = PhysAddr(0x400F);
        assert_eq!(PageFrame::next_above(a), PageFrame(5));
        assert_eq!(PageFrame::including(a), PageFrame(4));
        assert_eq!(PageFrame::next_above(PhysAddr(0x4000)), PageFrame(4), "aligned addresses stay");
        assert_eq!(PageFrame(4).end_address(), PhysAddr(0x5000));
        assert_eq!((PageFrame(4) + 2).start_address(), PhysAddr(0x6000));
    }
}
