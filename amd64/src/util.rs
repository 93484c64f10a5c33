//! Bit field accessors for hardware register values.

use core::ops::{Bound, RangeBounds};

/// Read and write single bits or inclusive bit ranges of an integer.
pub trait Bits: Sized + Copy {
    const WIDTH: usize;

    fn get_bit(&self, idx: usize) -> bool;
    fn set_bit(&mut self, idx: usize, value: bool);

    fn get_bits<R: RangeBounds<usize>>(&self, range: R) -> Self;
    fn set_bits<R: RangeBounds<usize>>(&mut self, range: R, value: Self);
}

/// Resolve a range of bit indices to `(first, last)`, both inclusive.
fn bit_bounds<R: RangeBounds<usize>>(range: &R, width: usize) -> (usize, usize) {
    let first = match range.start_bound() {
        Bound::Included(i) => *i,
        Bound::Excluded(e) => *e + 1,
        Bound::Unbounded => 0,
    };
    let last = match range.end_bound() {
        Bound::Included(i) => *i,
        Bound::Excluded(e) => *e - 1,
        Bound::Unbounded => width - 1,
    };
    assert!(first <= last && last < width, "bit range out of bounds");
    (first, last)
}

macro_rules! impl_bits {
    ($bittype:ty) => {
        impl Bits for $bittype {
            const WIDTH: usize = core::mem::size_of::<$bittype>() * 8;

            #[inline(always)]
            fn get_bit(&self, idx: usize) -> bool {
                self & (1 << idx) != 0
            }

            #[inline(always)]
            fn set_bit(&mut self, idx: usize, value: bool) {
                if value {
                    *self |= 1 << idx;
                } else {
                    *self &= !(1 << idx);
                }
            }

            #[inline(always)]
            fn get_bits<R: RangeBounds<usize>>(&self, range: R) -> Self {
                let (first, last) = bit_bounds(&range, Self::WIDTH);
                let mask = <$bittype>::MAX >> (Self::WIDTH - 1 - (last - first));
                (*self >> first) & mask
            }

            #[inline(always)]
            fn set_bits<R: RangeBounds<usize>>(&mut self, range: R, value: Self) {
                let (first, last) = bit_bounds(&range, Self::WIDTH);
                let mask = <$bittype>::MAX >> (Self::WIDTH - 1 - (last - first));
                *self = (*self & !(mask << first)) | ((value & mask) << first);
            }
        }
    };
}

impl_bits!(u32);
impl_bits!(u64);
