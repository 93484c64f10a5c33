//! Memory mapped register windows.

use crate::PhysAddr;

use core::sync::atomic::{AtomicPtr, Ordering};

/// A block of 32 bit registers addressed by byte offset.
///
/// Interrupt controller drivers are written against this trait so that the
/// register traffic they produce can be observed without real hardware.
pub trait RegisterWindow {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

/// Volatile access to a register block mapped at a fixed address.
pub struct MmioWindow(AtomicPtr<u32>);

impl MmioWindow {
    /// # Safety
    ///
    /// `base` must be the (identity mapped, uncached) start of a register block
    /// that is valid for every offset the owning driver accesses, and no other
    /// window may alias it.
    pub unsafe fn new(base: PhysAddr) -> MmioWindow {
        assert!(!base.is_null(), "register window at null address");
        MmioWindow(AtomicPtr::new(base.0 as *mut u32))
    }

    pub fn base(&self) -> PhysAddr {
        PhysAddr(self.0.load(Ordering::Acquire) as usize)
    }

    #[inline(always)]
    fn register(&self, offset: usize) -> *mut u32 {
        assert!(offset % 4 == 0, "misaligned register offset");
        // SAFETY: the window covers every offset its driver uses.
        unsafe { self.0.load(Ordering::Acquire).add(offset >> 2) }
    }
}

impl RegisterWindow for MmioWindow {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: see `MmioWindow::new`.
        unsafe { self.register(offset).read_volatile() }
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        // SAFETY: see `MmioWindow::new`.
        unsafe { self.register(offset).write_volatile(value) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn window_addresses_registers_by_byte_offset() {
        let mut block = [0u32; 64];
        let window = unsafe { MmioWindow::new(PhysAddr(block.as_mut_ptr() as usize)) };
        window.write(0xB0, 0xDEAD_BEEF);
        assert_eq!(window.read(0xB0), 0xDEAD_BEEF);
        drop(window);
        assert_eq!(block[0xB0 / 4], 0xDEAD_BEEF);
    }

    #[test]
    #[should_panic(expected = "misaligned")]
    fn rejects_misaligned_offset() {
        let mut block = [0u32; 4];
        let window = unsafe { MmioWindow::new(PhysAddr(block.as_mut_ptr() as usize)) };
        window.read(2);
    }
}
