//! Parser for the Multiboot2 memory map.

use amd64::mem::ReadLe;

use core::fmt;
use core::iter::{FusedIterator, Iterator};

/// Smallest entry layout the parser understands: base, length, type and a reserved word.
const MIN_ENTRY_SIZE: usize = 24;

#[derive(Debug, Clone, Copy)]
pub struct MemoryMap<'a> {
    entry_size: usize,
    entry_version: u32,
    entries: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    /// Parse the body of a memory map tag (without the tag header).
    pub(crate) fn parse(body: &'a [u8]) -> Option<MemoryMap<'a>> {
        let entry_size = body.read_u32(0)? as usize;
        let entry_version = body.read_u32(4)?;
        if entry_size < MIN_ENTRY_SIZE {
            warn!("multiboot2: memory map entry size {} is too small", entry_size);
        }
        Some(MemoryMap { entry_size, entry_version, entries: body.get(8..)? })
    }

    pub fn entry_version(&self) -> u32 {
        self.entry_version
    }

    pub fn regions(&self) -> Entries<'a> {
        let entries = if self.entry_size < MIN_ENTRY_SIZE { &[][..] } else { self.entries };
        Entries { entries, entry_size: self.entry_size.max(MIN_ENTRY_SIZE) }
    }
}

/// An iterator over the entries of a multiboot2 memory map.
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    entries: &'a [u8],
    entry_size: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Region;

    fn next(&mut self) -> Option<Self::Item> {
        if self.entries.len() < self.entry_size {
            return None;
        }
        let (entry, rest) = self.entries.split_at(self.entry_size);
        self.entries = rest;
        Some(Region {
            base_addr: entry.read_u64(0)?,
            length: entry.read_u64(8)?,
            entry_type: EntryType(entry.read_u32(16)?),
        })
    }
}

impl<'a> FusedIterator for Entries<'a> {}

/// The type of an entry in the memory map.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct EntryType(pub u32);

impl EntryType {
    pub const AVAILABLE: EntryType = EntryType(1);
    pub const RESERVED: EntryType = EntryType(2);
    pub const AVAILABLE_ACPI: EntryType = EntryType(3);
    pub const RESERVED_HIBERNATION: EntryType = EntryType(4);
    pub const DEFECTIVE: EntryType = EntryType(5);
}

impl fmt::Debug for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let description = match *self {
            EntryType::AVAILABLE => "Available",
            EntryType::AVAILABLE_ACPI => "AvailableACPI",
            EntryType::RESERVED_HIBERNATION => "ReservedHibernation",
            EntryType::DEFECTIVE => "Defective",
            _ => "Reserved",
        };
        write!(f, "EntryType({} ~ {})", self.0, description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    base_addr: u64,
    length: u64,
    entry_type: EntryType,
}

impl Region {
    /// Return whether the memory range described by this entry is available to the OS.
    pub fn is_available(&self) -> bool {
        self.entry_type == EntryType::AVAILABLE
    }

    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }
}
