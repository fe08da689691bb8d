//! Newtype wrappers that make it harder to accidentally confuse physical and virtual addresses.

use core::fmt;
use core::ops;

use super::align::Alignable;

/// A virtual address. It's validity depends on the current page mapping.
#[repr(C)]
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug, Hash)]
pub struct VirtAddr(pub usize);

/// A physical address. Whether it is accessible depends on the current page mapping.
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug, Hash)]
#[repr(C)]
pub struct PhysAddr(pub usize);

impl VirtAddr {
    /// Build a virtual address from a pointer.
    pub fn from_ptr<T>(ptr: *const T) -> VirtAddr {
        VirtAddr(ptr as usize)
    }

    pub unsafe fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub unsafe fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Whether the upper 16 bits are a sign extension of bit 47.
    pub fn is_canonical(self) -> bool {
        let upper = self.0 >> 47;
        upper == 0 || upper == 0x1_FFFF
    }
}

impl PhysAddr {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A half-open address range `[start, end)` of either physical or virtual memory locations.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddrRange<Addr> {
    pub start: Addr,
    pub end: Addr,
}

impl<Addr> AddrRange<Addr> where
    Addr: ops::Add<usize, Output=Addr> + ops::Sub<Addr, Output=usize> + Copy + Ord
{
    pub fn new(start: Addr, length: usize) -> AddrRange<Addr> {
        AddrRange {
            start: start,
            end: start + length,
        }
    }

    /// Build a range from its bounds. An inverted range is collapsed to an empty one at `start`.
    pub fn from_bounds(start: Addr, end: Addr) -> AddrRange<Addr> {
        AddrRange {
            start: start,
            end: if end < start { start } else { end },
        }
    }

    pub fn length(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn overlaps(&self, other: &AddrRange<Addr>) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The common part of both ranges, if there is any.
    pub fn intersection(&self, other: &AddrRange<Addr>) -> Option<AddrRange<Addr>> {
        let start = core::cmp::max(self.start, other.start);
        let end = core::cmp::min(self.end, other.end);
        if start < end {
            Some(AddrRange { start, end })
        } else {
            None
        }
    }
}

pub type PhysAddrRange = AddrRange<PhysAddr>;
pub type VirtAddrRange = AddrRange<VirtAddr>;

macro_rules! impl_addr_arith {
    ($addr:tt) => {
        impl Alignable for $addr {
            type Alignment = usize;

            fn align_up(self, alignment: usize) -> Self {
                $addr(self.0.align_up(alignment))
            }

            fn align_down(self, alignment: usize) -> Self {
                $addr(self.0.align_down(alignment))
            }

            fn is_aligned(self, alignment: usize) -> bool {
                self.0.is_aligned(alignment)
            }
        }

        impl ops::Add<usize> for $addr {
            type Output = $addr;

            fn add(self, other: usize) -> Self::Output {
                $addr(self.0 + other)
            }
        }

        impl ops::AddAssign<usize> for $addr {
            fn add_assign(&mut self, other: usize) {
                self.0 += other;
            }
        }

        impl ops::Sub<usize> for $addr {
            type Output = $addr;

            fn sub(self, other: usize) -> Self::Output {
                $addr(self.0 - other)
            }
        }

        impl ops::Sub<$addr> for $addr {
            type Output = usize;

            fn sub(self, other: $addr) -> Self::Output {
                self.0 - other.0
            }
        }

        impl fmt::LowerHex for $addr {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

impl_addr_arith!(VirtAddr);
impl_addr_arith!(PhysAddr);

impl fmt::Pointer for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}_P", self.0)
    }
}

impl fmt::Pointer for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}_V", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range_intersection() {
        let a = PhysAddrRange::from_bounds(PhysAddr(0x1000), PhysAddr(0x5000));
        let b = PhysAddrRange::from_bounds(PhysAddr(0x4000), PhysAddr(0x9000));
        let c = PhysAddrRange::from_bounds(PhysAddr(0x5000), PhysAddr(0x6000));

        assert!(a.overlaps(&b));
        assert_eq!(a.intersection(&b), Some(PhysAddrRange::from_bounds(PhysAddr(0x4000), PhysAddr(0x5000))));
        // touching ranges do not overlap
        assert!(!a.overlaps(&c), "end is exclusive");
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn inverted_bounds_are_empty() {
        let r = VirtAddrRange::from_bounds(VirtAddr(0x2000), VirtAddr(0x1000));
        assert!(r.is_empty());
        assert_eq!(r.length(), 0);
    }

    #[test]
    fn canonical_addresses() {
        assert!(VirtAddr(0x0000_7FFF_FFFF_F000).is_canonical());
        assert!(VirtAddr(0xFFFF_8000_0000_0000).is_canonical());
        assert!(!VirtAddr(0x0000_8000_0000_0000).is_canonical());
    }
}
