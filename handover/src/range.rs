//! Page granular physical memory ranges.

use amd64::{PhysAddr, PAGE_SIZE};

use core::fmt;

const PAGE_MASK: usize = PAGE_SIZE - 1;

/// A `[base, base + size)` range of physical memory.
#[derive(Clone, Copy, Eq, PartialEq, Default, Hash)]
pub struct MemoryRange {
    pub base: usize,
    pub size: usize,
}

impl MemoryRange {
    pub const fn new(base: usize, size: usize) -> MemoryRange {
        MemoryRange { base, size }
    }

    /// Shrink `[base, base + size)` to the page aligned region it encloses.
    ///
    /// When the range does not span a whole page the result is empty and
    /// starts at the first page boundary after `base`.
    pub fn from_non_aligned(base: usize, size: usize) -> MemoryRange {
        let padding = (PAGE_SIZE - base % PAGE_SIZE) & PAGE_MASK;
        let aligned_base = match base.checked_add(padding) {
            Some(aligned_base) => aligned_base,
            None => return MemoryRange::new(base & !PAGE_MASK, 0),
        };
        let size = size.saturating_sub(padding).min(usize::MAX - aligned_base);
        MemoryRange::new(aligned_base, size & !PAGE_MASK)
    }

    /// Grow `[base, base + size)` to the smallest page aligned region covering it.
    ///
    /// An already aligned size is kept as is. Sizes saturate at the last
    /// page boundary of the address space.
    pub fn around_non_aligned(base: usize, size: usize) -> MemoryRange {
        let padding = base % PAGE_SIZE;
        let base = base - padding;
        let limit = (usize::MAX - base) & !PAGE_MASK;
        let size = size
            .saturating_add(padding)
            .checked_add(PAGE_MASK)
            .map_or(limit, |s| s & !PAGE_MASK)
            .min(limit);
        MemoryRange::new(base, size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn start(&self) -> PhysAddr {
        PhysAddr(self.base)
    }

    /// First address past the range, saturating at the top of the address space.
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }

    pub fn is_page_aligned(&self) -> bool {
        self.base & PAGE_MASK == 0 && self.size & PAGE_MASK == 0
    }

    /// Whether `other` lies completely inside this range. Empty ranges are contained everywhere.
    pub fn contains_range(&self, other: &MemoryRange) -> bool {
        other.is_empty() || (other.base >= self.base && other.end() <= self.end())
    }
}

impl fmt::Debug for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}-{:#010x}", self.base, self.end())
    }
}
