/// Rounding of addresses and sizes to power of two boundaries.
/// An alignment of zero leaves the value unchanged.
pub trait Alignable: Sized {
    type Alignment;

    /// Smallest multiple of `alignment` not below `self`.
    fn align_up(self, alignment: Self::Alignment) -> Self;

    /// Largest multiple of `alignment` not above `self`.
    fn align_down(self, alignment: Self::Alignment) -> Self;
}

macro_rules! low_bits {
    ($numtype:tt, $alignment:expr) => {{
        let alignment: $numtype = $alignment;
        assert!(alignment == 0 || alignment.is_power_of_two(), "alignment must be power of two");
        alignment.saturating_sub(1)
    }};
}

macro_rules! align_impl {
    ($numtype:tt) => {
        impl Alignable for $numtype {
            type Alignment = $numtype;

            #[inline]
            fn align_up(self, alignment: Self) -> Self {
                let low = low_bits!($numtype, alignment);
                (self + low) & !low
            }

            #[inline]
            fn align_down(self, alignment: Self) -> Self {
                self & !low_bits!($numtype, alignment)
            }
        }
    };
}

align_impl!(usize);
align_impl!(u64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_alignment() {
        assert_eq!(0x1234_usize.align_down(0x1000), 0x1000);
        assert_eq!(0x1234_usize.align_up(0x1000), 0x2000);
        assert_eq!(0x2000_usize.align_up(0x1000), 0x2000);
        assert_eq!(0xFEE0_0FFF_u64.align_down(0x1000), 0xFEE0_0000);
    }

    #[test]
    fn tag_alignment() {
        assert_eq!(9_usize.align_up(8), 16);
        assert_eq!(16_usize.align_up(8), 16);
        assert_eq!(0_usize.align_up(8), 0);
    }

    #[test]
    fn zero_alignment_is_identity() {
        assert_eq!(23_usize.align_up(0), 23);
        assert_eq!(usize::MAX.align_up(0), usize::MAX);
        assert_eq!(usize::MAX.align_down(0), usize::MAX);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_odd_alignment() {
        let _ = 10_usize.align_up(6);
    }
}
