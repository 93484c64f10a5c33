#![cfg_attr(not(test), no_std)]
//! Decoder for the Multiboot2 information structure provided by the bootloader.
//!
//! The information is read through a [`PhysMemory`] view. The structure is
//! copied out tag by tag and every length field is checked against the total
//! size the bootloader announced, so a bogus structure ends the tag walk
//! instead of sending the kernel into unmapped memory.

#[macro_use]
extern crate log;

use amd64::mem::{until_nul, PhysMemory, ReadLe};
use amd64::{Alignable, PhysAddr};

use core::iter::FusedIterator;

pub mod memmap;

/// Value found in `eax` when a Multiboot2 compliant bootloader jumps to the kernel.
pub const BOOTLOADER_MAGIC: u32 = 0x36D7_6289;

/// Size of the fixed header in front of the first tag.
const INFO_HEADER_SIZE: usize = 8;
/// Size of the `{type, size}` header every tag starts with.
const TAG_HEADER_SIZE: usize = 8;
/// Tags start at 8 byte aligned offsets.
const TAG_ALIGN: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("multiboot2 information at {0:#x} is not readable")]
    Unreadable(usize),
    #[error("multiboot2 information declares an invalid size of {0} bytes")]
    InvalidSize(usize),
}

/// Root of Multiboot2 info data.
#[derive(Debug, Clone, Copy)]
pub struct Multiboot2Info<'a> {
    start: PhysAddr,
    data: &'a [u8],
}

impl<'a> Multiboot2Info<'a> {
    /// Locate the information structure at `start` and make sure all of it is readable.
    pub fn from_addr<M: PhysMemory>(mem: &'a M, start: PhysAddr) -> Result<Multiboot2Info<'a>, Error> {
        let header = mem.slice(start, INFO_HEADER_SIZE).ok_or(Error::Unreadable(start.0))?;
        let total_size = header.read_u32(0).ok_or(Error::Unreadable(start.0))? as usize;
        if total_size < INFO_HEADER_SIZE {
            return Err(Error::InvalidSize(total_size));
        }
        let data = mem.slice(start, total_size).ok_or(Error::Unreadable(start.0))?;
        Ok(Multiboot2Info { start, data })
    }

    pub fn start_addr(&self) -> PhysAddr {
        self.start
    }

    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn tags(&self) -> TagsIter<'a> {
        TagsIter { start: self.start, data: self.data, offset: INFO_HEADER_SIZE, done: false }
    }

    pub fn boot_cmd_line(&self) -> Option<&'a [u8]> {
        self.tags().find_map(|t| match t {
            Tag::BootCommandLine(cmd_line) => Some(cmd_line),
            _ => None,
        })
    }

    pub fn bootloader_name(&self) -> Option<&'a [u8]> {
        self.tags().find_map(|t| match t {
            Tag::BootLoaderName(name) => Some(name),
            _ => None,
        })
    }

    pub fn memory_map(&self) -> Option<memmap::MemoryMap<'a>> {
        self.tags().find_map(|t| match t {
            Tag::MemoryMap(mmap) => Some(mmap),
            _ => None,
        })
    }

    pub fn modules(&self) -> impl Iterator<Item = ModuleTag<'a>> {
        self.tags().filter_map(|t| match t {
            Tag::Module(module) => Some(module),
            _ => None,
        })
    }
}

/// The tag types this decoder understands.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub struct TagType(pub u32);

impl TagType {
    pub const END: TagType = TagType(0);
    pub const BOOT_CMD_LINE: TagType = TagType(1);
    pub const BOOT_LOADER_NAME: TagType = TagType(2);
    pub const MODULE: TagType = TagType(3);
    pub const BASIC_MEMORY_INFO: TagType = TagType(4);
    pub const MEMORY_MAP: TagType = TagType(6);
    pub const FRAMEBUFFER: TagType = TagType(8);
    pub const ACPI_OLD_RSDP: TagType = TagType(14);
    pub const ACPI_NEW_RSDP: TagType = TagType(15);
}

/// A decoded tag. Strings are handed out as raw bytes without the NUL terminator.
#[derive(Debug, Clone, Copy)]
pub enum Tag<'a> {
    BootCommandLine(&'a [u8]),
    BootLoaderName(&'a [u8]),
    Module(ModuleTag<'a>),
    BasicMemoryInfo { mem_lower_kib: u32, mem_upper_kib: u32 },
    MemoryMap(memmap::MemoryMap<'a>),
    Framebuffer(FramebufferTag),
    /// Physical address of the ACPI 1.0 RSDP copy stored inside the tag.
    AcpiOldRsdp(PhysAddr),
    /// Physical address of the ACPI 2.0+ RSDP copy stored inside the tag.
    AcpiNewRsdp(PhysAddr),
    Other(TagType, &'a [u8]),
}

impl<'a> Tag<'a> {
    /// Decode the body of a tag. `body` excludes the tag header, `body_addr` is its physical address.
    fn decode(tag_type: TagType, body: &'a [u8], body_addr: PhysAddr) -> Option<Tag<'a>> {
        let tag = match tag_type {
            TagType::BOOT_CMD_LINE => Tag::BootCommandLine(until_nul(body)),
            TagType::BOOT_LOADER_NAME => Tag::BootLoaderName(until_nul(body)),
            TagType::MODULE => Tag::Module(ModuleTag {
                mod_start: body.read_u32(0)?,
                mod_end: body.read_u32(4)?,
                cmd_line: until_nul(body.get(8..)?),
            }),
            TagType::BASIC_MEMORY_INFO => Tag::BasicMemoryInfo {
                mem_lower_kib: body.read_u32(0)?,
                mem_upper_kib: body.read_u32(4)?,
            },
            TagType::MEMORY_MAP => Tag::MemoryMap(memmap::MemoryMap::parse(body)?),
            TagType::FRAMEBUFFER => Tag::Framebuffer(FramebufferTag {
                address: body.read_u64(0)?,
                pitch: body.read_u32(8)?,
                width: body.read_u32(12)?,
                height: body.read_u32(16)?,
                bpp: body.read_u8(20)?,
            }),
            TagType::ACPI_OLD_RSDP => Tag::AcpiOldRsdp(body_addr),
            TagType::ACPI_NEW_RSDP => Tag::AcpiNewRsdp(body_addr),
            other => Tag::Other(other, body),
        };
        Some(tag)
    }
}

/// A boot module loaded by the bootloader.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ModuleTag<'a> {
    mod_start: u32,
    mod_end: u32,
    cmd_line: &'a [u8],
}

impl<'a> ModuleTag<'a> {
    /// Physical address where the module begins.
    pub fn mod_start(&self) -> PhysAddr {
        PhysAddr(self.mod_start as usize)
    }

    /// Physical address where the module ends (not included).
    pub fn mod_end(&self) -> PhysAddr {
        PhysAddr(self.mod_end as usize)
    }

    pub fn cmd_line(&self) -> &'a [u8] {
        self.cmd_line
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FramebufferTag {
    pub address: u64,
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
}

/// An iterator over the tags in the multiboot structure.
/// Construct using `Multiboot2Info::tags`.
#[derive(Debug, Clone)]
pub struct TagsIter<'a> {
    start: PhysAddr,
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> TagsIter<'a> {
    fn stop(&mut self) -> Option<Tag<'a>> {
        self.done = true;
        None
    }
}

impl<'a> Iterator for TagsIter<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (tag_type, size) = match (self.data.read_u32(self.offset), self.data.read_u32(self.offset + 4)) {
            (Some(t), Some(s)) => (TagType(t), s as usize),
            _ => {
                warn!("multiboot2: tag list ends without an end tag");
                return self.stop();
            }
        };
        if tag_type == TagType::END {
            return self.stop();
        }
        let end = match self.offset.checked_add(size) {
            Some(end) if size >= TAG_HEADER_SIZE && end <= self.data.len() => end,
            _ => {
                warn!("multiboot2: tag {} at offset {} has invalid size {}", tag_type.0, self.offset, size);
                return self.stop();
            }
        };

        let body_offset = self.offset + TAG_HEADER_SIZE;
        let body = &self.data[body_offset..end];
        let body_addr = self.start + body_offset;
        self.offset = end.align_up(TAG_ALIGN);

        match Tag::decode(tag_type, body, body_addr) {
            Some(tag) => Some(tag),
            None => {
                warn!("multiboot2: tag {} is too short for its type", tag_type.0);
                Some(Tag::Other(tag_type, body))
            }
        }
    }
}

impl<'a> FusedIterator for TagsIter<'a> {}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use amd64::mem::SliceMemory;
    use std::vec::Vec;

    /// Assembles a Multiboot2 information structure.
    pub struct InfoBuilder {
        bytes: Vec<u8>,
    }

    impl InfoBuilder {
        pub fn new() -> InfoBuilder {
            InfoBuilder { bytes: std::vec![0; 8] }
        }

        pub fn tag(mut self, tag_type: u32, body: &[u8]) -> InfoBuilder {
            self.bytes.extend_from_slice(&tag_type.to_le_bytes());
            self.bytes.extend_from_slice(&(8 + body.len() as u32).to_le_bytes());
            self.bytes.extend_from_slice(body);
            while self.bytes.len() % 8 != 0 {
                self.bytes.push(0);
            }
            self
        }

        pub fn finish(self) -> Vec<u8> {
            let mut bytes = self.tag(0, &[]).bytes;
            let total = bytes.len() as u32;
            bytes[0..4].copy_from_slice(&total.to_le_bytes());
            bytes
        }
    }

    pub fn module_body(start: u32, end: u32, name: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&start.to_le_bytes());
        body.extend_from_slice(&end.to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body
    }

    #[test]
    fn walks_tags_in_order() {
        let blob = InfoBuilder::new()
            .tag(2, b"GRUB 2.06\0")
            .tag(1, b"loglevel=debug\0")
            .tag(3, &module_body(0x20_0000, 0x20_1800, "initrd"))
            .tag(42, &[1, 2, 3])
            .finish();
        let mem = SliceMemory::new(PhysAddr(0x9000), &blob);
        let info = Multiboot2Info::from_addr(&mem, PhysAddr(0x9000)).unwrap();

        assert_eq!(info.length(), blob.len());
        assert_eq!(info.bootloader_name(), Some(&b"GRUB 2.06"[..]));
        assert_eq!(info.boot_cmd_line(), Some(&b"loglevel=debug"[..]));

        let modules: Vec<_> = info.modules().collect();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].mod_start(), PhysAddr(0x20_0000));
        assert_eq!(modules[0].mod_end(), PhysAddr(0x20_1800));
        assert_eq!(modules[0].cmd_line(), b"initrd");

        let kinds: Vec<u32> = info
            .tags()
            .map(|t| match t {
                Tag::BootLoaderName(_) => 2,
                Tag::BootCommandLine(_) => 1,
                Tag::Module(_) => 3,
                Tag::Other(id, _) => id.0,
                _ => u32::MAX,
            })
            .collect();
        assert_eq!(kinds, [2, 1, 3, 42]);
    }

    #[test]
    fn rsdp_tags_point_into_the_structure() {
        let blob = InfoBuilder::new().tag(14, &[0u8; 20]).finish();
        let mem = SliceMemory::new(PhysAddr(0x9000), &blob);
        let info = Multiboot2Info::from_addr(&mem, PhysAddr(0x9000)).unwrap();
        match info.tags().next() {
            Some(Tag::AcpiOldRsdp(addr)) => assert_eq!(addr, PhysAddr(0x9010)),
            other => panic!("unexpected tag {:?}", other),
        }
    }

    #[test]
    fn oversized_tag_ends_walk() {
        let mut blob = InfoBuilder::new().tag(1, b"a\0").tag(2, b"b\0").finish();
        // corrupt the size of the second tag
        blob[28..32].copy_from_slice(&0x1000u32.to_le_bytes());
        let mem = SliceMemory::new(PhysAddr(0), &blob);
        let info = Multiboot2Info::from_addr(&mem, PhysAddr(0)).unwrap();
        assert_eq!(info.tags().count(), 1);
    }

    #[test]
    fn undersized_tag_ends_walk() {
        let mut blob = InfoBuilder::new().tag(1, b"a\0").finish();
        blob[12..16].copy_from_slice(&4u32.to_le_bytes());
        let mem = SliceMemory::new(PhysAddr(0), &blob);
        let info = Multiboot2Info::from_addr(&mem, PhysAddr(0)).unwrap();
        assert_eq!(info.tags().count(), 0);
    }

    #[test]
    fn truncated_info_is_rejected() {
        let blob = InfoBuilder::new().tag(1, b"cmdline\0").finish();
        let mem = SliceMemory::new(PhysAddr(0x100), &blob[..12]);
        assert_eq!(Multiboot2Info::from_addr(&mem, PhysAddr(0x100)).unwrap_err(), Error::Unreadable(0x100));
    }
}
