//! Physical addresses as reported by firmware and bootloaders.

use core::fmt;
use core::ops;

/// A physical address. Whether it is accessible depends on the current page mapping.
#[repr(C)]
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug, Default, Hash)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    /// Build a physical address from a 64 bit value reported by firmware or a bootloader.
    /// Returns `None` when the value does not fit the native address width.
    pub fn from_u64(addr: u64) -> Option<PhysAddr> {
        usize::try_from(addr).ok().map(PhysAddr)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset the address, returning `None` on overflow.
    pub fn checked_add(self, offset: usize) -> Option<PhysAddr> {
        self.0.checked_add(offset).map(PhysAddr)
    }
}

macro_rules! impl_addr_arith {
    ($addr:tt) => {
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

        impl ops::Sub<$addr> for $addr {
            type Output = usize;

            fn sub(self, other: $addr) -> Self::Output {
                self.0 - other.0
            }
        }

        impl fmt::LowerHex for $addr {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

impl_addr_arith!(PhysAddr);

impl fmt::Pointer for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08x}_P", self.0)
    }
}
