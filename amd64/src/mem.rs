//! Read-only views of physical memory.
//!
//! Bootloader structures and firmware tables are reached through physical
//! addresses. Decoders never dereference those addresses directly, they ask a
//! [`PhysMemory`] for a byte slice and validate every field against its length.

use crate::PhysAddr;

/// Provides byte-level read access to physical memory.
pub trait PhysMemory {
    /// Return up to `max_len` bytes starting at `addr`.
    ///
    /// The slice may be shorter than requested (or empty) when the view ends
    /// before `addr + max_len`.
    fn bytes(&self, addr: PhysAddr, max_len: usize) -> &[u8];

    /// Return exactly `len` bytes starting at `addr`, or `None` if the view
    /// does not cover the whole range.
    fn slice(&self, addr: PhysAddr, len: usize) -> Option<&[u8]> {
        let bytes = self.bytes(addr, len);
        if bytes.len() == len {
            Some(bytes)
        } else {
            None
        }
    }
}

/// Physical memory that is identity mapped into the current address space.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapped;

impl IdentityMapped {
    /// # Safety
    ///
    /// Every physical address handed to the returned view must be mapped at the
    /// same virtual address and must stay valid for the lifetime of the kernel.
    pub const unsafe fn new() -> IdentityMapped {
        IdentityMapped
    }
}

impl PhysMemory for IdentityMapped {
    fn bytes(&self, addr: PhysAddr, max_len: usize) -> &[u8] {
        if addr.is_null() {
            return &[];
        }
        let len = max_len.min(usize::MAX - addr.0);
        // SAFETY: the constructor contract guarantees the mapping.
        unsafe { core::slice::from_raw_parts(addr.0 as *const u8, len) }
    }
}

/// A byte buffer that pretends to live at a fixed physical address.
///
/// Useful for decoding structures that were copied out of their original
/// location, and for exercising decoders without real firmware.
#[derive(Debug, Clone, Copy)]
pub struct SliceMemory<'a> {
    base: PhysAddr,
    data: &'a [u8],
}

impl<'a> SliceMemory<'a> {
    pub const fn new(base: PhysAddr, data: &'a [u8]) -> SliceMemory<'a> {
        SliceMemory { base, data }
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }
}

impl<'a> PhysMemory for SliceMemory<'a> {
    fn bytes(&self, addr: PhysAddr, max_len: usize) -> &[u8] {
        if addr < self.base {
            return &[];
        }
        let offset = addr - self.base;
        if offset >= self.data.len() {
            return &[];
        }
        let end = offset.saturating_add(max_len).min(self.data.len());
        &self.data[offset..end]
    }
}

/// Little endian field accessors for raw structures.
pub trait ReadLe {
    fn read_u8(&self, offset: usize) -> Option<u8>;
    fn read_u16(&self, offset: usize) -> Option<u16>;
    fn read_u32(&self, offset: usize) -> Option<u32>;
    fn read_u64(&self, offset: usize) -> Option<u64>;
}

impl ReadLe for [u8] {
    fn read_u8(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.get(offset..offset.checked_add(4)?)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Some(u32::from_le_bytes(raw))
    }

    fn read_u64(&self, offset: usize) -> Option<u64> {
        let bytes = self.get(offset..offset.checked_add(8)?)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Some(u64::from_le_bytes(raw))
    }
}

/// Cut a byte string at its first NUL terminator, if any.
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
