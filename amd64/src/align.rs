/// Something (usually addresses or sizes) that is alignable to a certain alignment
/// represented in the same type and usually a power of two.
pub trait Alignable: Sized {
    type Alignment;

    /// Returns the smallest `x` that is a multiple of `alignment` such that `x >= num`.
    ///
    /// # Panics
    ///
    /// Panics if the result does not fit into the type.
    fn align_up(self, alignment: Self::Alignment) -> Self;

    /// Returns the largest `x` that is a multiple of `alignment` such that `x <= num`.
    fn align_down(self, alignment: Self::Alignment) -> Self;

    /// Returns whether the value is aligned to the given alignment.
    fn is_aligned(self, alignment: Self::Alignment) -> bool;
}

/// Rounding up that reports overflow instead of panicking. Needed for memory map
/// entries that end right below the top of the address space.
pub trait CheckedAlign: Sized {
    fn checked_align_up(self, alignment: Self) -> Option<Self>;
}

macro_rules! align_impl {
    ($numtype:tt) => {
        impl Alignable for $numtype {
            type Alignment = $numtype;
            fn align_up(self, alignment: Self) -> Self {
                self.checked_align_up(alignment).expect("align_up overflowed")
            }
            fn align_down(self, alignment: Self) -> Self {
                if alignment == 0 {
                    self
                } else {
                    let mask = alignment - 1;
                    assert!(alignment & mask == 0, "alignment must be power of two");
                    self & !mask
                }
            }
            fn is_aligned(self, alignment: Self) -> bool {
                self.align_down(alignment) == self
            }
        }

        impl CheckedAlign for $numtype {
            fn checked_align_up(self, alignment: Self) -> Option<Self> {
                if alignment == 0 {
                    Some(self)
                } else {
                    let mask = alignment - 1;
                    assert!(alignment & mask == 0, "alignment must be power of two");
                    self.checked_add(mask).map(|v| v & !mask)
                }
            }
        }
    };
}

align_impl!(usize);
align_impl!(u64);
align_impl!(u32);
align_impl!(u16);
align_impl!(u8);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn align_down_test() {
        assert_eq!(23_usize.align_down(8), 16);
        assert_eq!(24_usize.align_down(8), 24);
        assert_eq!(0x1FFF_u64.align_down(0x1000), 0x1000);

        // alignment zero is the identity
        assert_eq!(23_usize.align_down(0), 23);
        assert_eq!(0xFFFF_FFFF_FFFF_FFFF_usize.align_down(0), 0xFFFF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn align_up_test() {
        assert_eq!(23_usize.align_up(8), 24);
        assert_eq!(24_usize.align_up(8), 24);
        assert_eq!(0x1001_u64.align_up(0x1000), 0x2000);
        assert_eq!(0_usize.align_up(0x1000), 0);
    }

    #[test]
    fn checked_align_up_reports_overflow() {
        assert_eq!(0xFFFF_FFFF_FFFF_F001_u64.checked_align_up(0x1000), None);
        assert_eq!(0xFFFF_FFFF_FFFF_F000_u64.checked_align_up(0x1000), Some(0xFFFF_FFFF_FFFF_F000));
    }

    #[test]
    fn is_aligned_test() {
        assert!(0x3000_usize.is_aligned(0x1000));
        assert!(!0x3008_usize.is_aligned(0x1000));
        assert!(0x3008_usize.is_aligned(8));
    }
}
