#![cfg_attr(not(test), no_std)]
//! Decoder for the stivale2 boot information structure.
//!
//! The bootloader hands over a header followed by a singly linked list of
//! tags, each carrying a 64 bit identifier and the physical address of the
//! next tag. All reads go through a [`PhysMemory`] view and are bounds checked.

#[macro_use]
extern crate log;

use amd64::mem::{until_nul, PhysMemory, ReadLe};
use amd64::PhysAddr;

use core::iter::FusedIterator;

/// Value found in `eax` when a stivale2 bootloader jumps to the kernel.
pub const BOOTLOADER_MAGIC: u32 = 0x7374_7632;

/// Upper bound on the number of tags visited, guards against cyclic tag lists.
pub const MAX_TAGS: usize = 128;

/// Longest command line that is looked at.
const CMDLINE_SCAN_LIMIT: usize = 4096;

const BRAND_LEN: usize = 64;
const VERSION_LEN: usize = 64;
const HEADER_SIZE: usize = BRAND_LEN + VERSION_LEN + 8;
const TAG_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("stivale2 header at {0:#x} is not readable")]
    Unreadable(usize),
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub struct TagId(pub u64);

impl TagId {
    pub const CMDLINE: TagId = TagId(0xE5E7_6A1B_4597_A781);
    pub const MEMMAP: TagId = TagId(0x2187_F79E_8612_DE07);
    pub const FRAMEBUFFER: TagId = TagId(0x5064_61D2_9504_08FA);
    pub const MODULES: TagId = TagId(0x4B6F_E466_AADE_04CE);
    pub const RSDP: TagId = TagId(0x9E17_8693_0A37_5E78);
    pub const SMP: TagId = TagId(0x34D1_D963_3964_7025);
}

/// Root of the stivale2 structure.
pub struct StivaleInfo<'a, M: PhysMemory> {
    mem: &'a M,
    brand: &'a [u8],
    version: &'a [u8],
    first_tag: u64,
}

impl<'a, M: PhysMemory> StivaleInfo<'a, M> {
    pub fn from_addr(mem: &'a M, addr: PhysAddr) -> Result<StivaleInfo<'a, M>, Error> {
        let header = mem.slice(addr, HEADER_SIZE).ok_or(Error::Unreadable(addr.0))?;
        let first_tag = header.read_u64(BRAND_LEN + VERSION_LEN).ok_or(Error::Unreadable(addr.0))?;
        Ok(StivaleInfo {
            mem,
            brand: until_nul(&header[..BRAND_LEN]),
            version: until_nul(&header[BRAND_LEN..BRAND_LEN + VERSION_LEN]),
            first_tag,
        })
    }

    /// Name of the bootloader.
    pub fn bootloader_brand(&self) -> &'a [u8] {
        self.brand
    }

    pub fn bootloader_version(&self) -> &'a [u8] {
        self.version
    }

    pub fn tags(&self) -> TagsIter<'a, M> {
        TagsIter { mem: self.mem, next: self.first_tag, visited: 0 }
    }
}

/// A decoded tag.
#[derive(Debug, Clone, Copy)]
pub enum Tag<'a> {
    CommandLine(&'a [u8]),
    MemoryMap(MemoryMap<'a>),
    Framebuffer(FramebufferTag),
    Modules(Modules<'a>),
    /// Physical address of the RSDP.
    Rsdp(u64),
    Smp(SmpTag<'a>),
    Unknown(TagId),
}

/// Iterator over the linked tag list. Stops at the end of the list, at the
/// first unreadable tag and after [`MAX_TAGS`] tags.
pub struct TagsIter<'a, M: PhysMemory> {
    mem: &'a M,
    next: u64,
    visited: usize,
}

impl<'a, M: PhysMemory> TagsIter<'a, M> {
    fn stop(&mut self) -> Option<Tag<'a>> {
        self.next = 0;
        None
    }

    fn decode(&self, id: TagId, addr: PhysAddr) -> Option<Tag<'a>> {
        let mem = self.mem;
        let tag = match id {
            TagId::CMDLINE => {
                let body = mem.slice(addr, TAG_HEADER_SIZE + 8)?;
                let string = PhysAddr::from_u64(body.read_u64(16)?)?;
                Tag::CommandLine(until_nul(mem.bytes(string, CMDLINE_SCAN_LIMIT)))
            }
            TagId::MEMMAP => {
                let count = mem.slice(addr, TAG_HEADER_SIZE + 8)?.read_u64(16)?;
                let entries = sized_array(mem, addr + TAG_HEADER_SIZE + 8, count, MemmapEntry::SIZE)?;
                Tag::MemoryMap(MemoryMap { entries })
            }
            TagId::FRAMEBUFFER => {
                let body = mem.slice(addr, TAG_HEADER_SIZE + 16)?;
                Tag::Framebuffer(FramebufferTag {
                    address: body.read_u64(16)?,
                    width: body.read_u16(24)?,
                    height: body.read_u16(26)?,
                    pitch: body.read_u16(28)?,
                    bpp: body.read_u16(30)?,
                })
            }
            TagId::MODULES => {
                let count = mem.slice(addr, TAG_HEADER_SIZE + 8)?.read_u64(16)?;
                let modules = sized_array(mem, addr + TAG_HEADER_SIZE + 8, count, Module::SIZE)?;
                Tag::Modules(Modules { modules })
            }
            TagId::RSDP => Tag::Rsdp(mem.slice(addr, TAG_HEADER_SIZE + 8)?.read_u64(16)?),
            TagId::SMP => {
                let body = mem.slice(addr, TAG_HEADER_SIZE + 24)?;
                let flags = body.read_u64(16)?;
                let bsp_lapic_id = body.read_u32(24)?;
                let count = body.read_u64(32)?;
                let cpus = sized_array(mem, addr + TAG_HEADER_SIZE + 24, count, SmpInfo::SIZE)?;
                Tag::Smp(SmpTag { flags, bsp_lapic_id, cpus })
            }
            other => Tag::Unknown(other),
        };
        Some(tag)
    }
}

/// Fetch `count` records of `size` bytes starting at `addr`.
fn sized_array<M: PhysMemory>(mem: &M, addr: PhysAddr, count: u64, size: usize) -> Option<&[u8]> {
    let len = usize::try_from(count).ok()?.checked_mul(size)?;
    mem.slice(addr, len)
}

impl<'a, M: PhysMemory> Iterator for TagsIter<'a, M> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }
        if self.visited == MAX_TAGS {
            warn!("stivale2: more than {} tags, assuming a cyclic list", MAX_TAGS);
            return self.stop();
        }
        self.visited += 1;

        let current = self.next;
        let mem = self.mem;
        let header = PhysAddr::from_u64(current).and_then(|addr| Some((addr, mem.slice(addr, TAG_HEADER_SIZE)?)));
        let (addr, id, next) = match header {
            Some((addr, header)) => match (header.read_u64(0), header.read_u64(8)) {
                (Some(id), Some(next)) => (addr, TagId(id), next),
                _ => {
                    warn!("stivale2: tag at {:#x} is not readable", current);
                    return self.stop();
                }
            },
            None => {
                warn!("stivale2: tag at {:#x} is not readable", current);
                return self.stop();
            }
        };

        match self.decode(id, addr) {
            Some(tag) => {
                self.next = next;
                Some(tag)
            }
            None => {
                warn!("stivale2: body of tag {:#x} at {:#x} is not readable", id.0, current);
                self.stop()
            }
        }
    }
}

impl<'a, M: PhysMemory> FusedIterator for TagsIter<'a, M> {}

#[derive(Debug, Clone, Copy)]
pub struct MemoryMap<'a> {
    entries: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    pub fn len(&self) -> usize {
        self.entries.len() / MemmapEntry::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = MemmapEntry> + 'a {
        self.entries.chunks_exact(MemmapEntry::SIZE).filter_map(|raw| {
            Some(MemmapEntry {
                base: raw.read_u64(0)?,
                length: raw.read_u64(8)?,
                entry_type: MemmapType(raw.read_u32(16)?),
            })
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MemmapEntry {
    pub base: u64,
    pub length: u64,
    pub entry_type: MemmapType,
}

impl MemmapEntry {
    const SIZE: usize = 24;
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub struct MemmapType(pub u32);

impl MemmapType {
    pub const USABLE: MemmapType = MemmapType(1);
    pub const RESERVED: MemmapType = MemmapType(2);
    pub const ACPI_RECLAIMABLE: MemmapType = MemmapType(3);
    pub const ACPI_NVS: MemmapType = MemmapType(4);
    pub const BAD_MEMORY: MemmapType = MemmapType(5);
    pub const BOOTLOADER_RECLAIMABLE: MemmapType = MemmapType(0x1000);
    pub const KERNEL_AND_MODULES: MemmapType = MemmapType(0x1001);
    pub const FRAMEBUFFER: MemmapType = MemmapType(0x1002);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FramebufferTag {
    pub address: u64,
    pub width: u16,
    pub height: u16,
    pub pitch: u16,
    pub bpp: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct Modules<'a> {
    modules: &'a [u8],
}

impl<'a> Modules<'a> {
    pub fn len(&self) -> usize {
        self.modules.len() / Module::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Module<'a>> + 'a {
        self.modules.chunks_exact(Module::SIZE).filter_map(|raw| {
            Some(Module {
                begin: raw.read_u64(0)?,
                end: raw.read_u64(8)?,
                string: until_nul(&raw[16..]),
            })
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Module<'a> {
    pub begin: u64,
    pub end: u64,
    pub string: &'a [u8],
}

impl<'a> Module<'a> {
    const SIZE: usize = 16 + 128;
}

#[derive(Debug, Clone, Copy)]
pub struct SmpTag<'a> {
    /// Raw flags, bit 0 reports x2APIC mode.
    pub flags: u64,
    pub bsp_lapic_id: u32,
    cpus: &'a [u8],
}

impl<'a> SmpTag<'a> {
    pub const FLAG_X2APIC: u64 = 1 << 0;

    pub fn cpu_count(&self) -> usize {
        self.cpus.len() / SmpInfo::SIZE
    }

    pub fn cpus(&self) -> impl Iterator<Item = SmpInfo> + 'a {
        self.cpus.chunks_exact(SmpInfo::SIZE).filter_map(|raw| {
            Some(SmpInfo {
                processor_id: raw.read_u32(0)?,
                lapic_id: raw.read_u32(4)?,
                target_stack: raw.read_u64(8)?,
                goto_address: raw.read_u64(16)?,
                extra_argument: raw.read_u64(24)?,
            })
        })
    }
}

/// Per-core entry of the SMP tag.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SmpInfo {
    pub processor_id: u32,
    pub lapic_id: u32,
    pub target_stack: u64,
    pub goto_address: u64,
    pub extra_argument: u64,
}

impl SmpInfo {
    const SIZE: usize = 32;
}

#[cfg(test)]
mod test {
    use super::*;
    use amd64::mem::SliceMemory;
    use std::vec::Vec;

    const BASE: usize = 0x8_0000;

    /// Lays out a stivale2 structure in a buffer placed at `BASE`.
    struct Image {
        bytes: Vec<u8>,
        last_tag: Option<usize>,
    }

    impl Image {
        fn new(brand: &str) -> Image {
            let mut bytes = std::vec![0u8; HEADER_SIZE];
            bytes[..brand.len()].copy_from_slice(brand.as_bytes());
            bytes[64..69].copy_from_slice(b"2.0.0");
            Image { bytes, last_tag: None }
        }

        fn link(&mut self, at: usize) {
            let field = match self.last_tag {
                Some(prev) => prev + 8,
                None => BRAND_LEN + VERSION_LEN,
            };
            self.bytes[field..field + 8].copy_from_slice(&((BASE + at) as u64).to_le_bytes());
            self.last_tag = Some(at);
        }

        fn tag(mut self, id: TagId, body: &[u8]) -> Image {
            let at = self.bytes.len();
            self.bytes.extend_from_slice(&id.0.to_le_bytes());
            self.bytes.extend_from_slice(&0u64.to_le_bytes());
            self.bytes.extend_from_slice(body);
            self.link(at);
            self
        }

        fn data(mut self, data: &[u8]) -> (Image, u64) {
            let at = self.bytes.len();
            self.bytes.extend_from_slice(data);
            (self, (BASE + at) as u64)
        }
    }

    fn u64s(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn header_strings() {
        let image = Image::new("Limine");
        let mem = SliceMemory::new(PhysAddr(BASE), &image.bytes);
        let info = StivaleInfo::from_addr(&mem, PhysAddr(BASE)).unwrap();
        assert_eq!(info.bootloader_brand(), b"Limine");
        assert_eq!(info.bootloader_version(), b"2.0.0");
        assert_eq!(info.tags().count(), 0);
    }

    #[test]
    fn decodes_known_tags() {
        let (image, cmdline) = Image::new("Limine").data(b"loglevel=trace nosmp\0");

        let mut memmap = u64s(&[2, 0x0, 0x9_F000]);
        memmap.extend_from_slice(&1u32.to_le_bytes());
        memmap.extend_from_slice(&0u32.to_le_bytes());
        memmap.extend_from_slice(&u64s(&[0x10_0000, 0x4000]));
        memmap.extend_from_slice(&0x1001u32.to_le_bytes());
        memmap.extend_from_slice(&0u32.to_le_bytes());

        let mut smp = u64s(&[1]);
        smp.extend_from_slice(&0u32.to_le_bytes());
        smp.extend_from_slice(&0u32.to_le_bytes());
        smp.extend_from_slice(&u64s(&[2]));
        for lapic in 0..2u32 {
            smp.extend_from_slice(&lapic.to_le_bytes());
            smp.extend_from_slice(&lapic.to_le_bytes());
            smp.extend_from_slice(&u64s(&[0x7000 * lapic as u64, 0, 0]));
        }

        let image = image
            .tag(TagId::CMDLINE, &u64s(&[cmdline]))
            .tag(TagId::MEMMAP, &memmap)
            .tag(TagId(0x1234), &[])
            .tag(TagId::RSDP, &u64s(&[0xE_0000]))
            .tag(TagId::SMP, &smp);
        let mem = SliceMemory::new(PhysAddr(BASE), &image.bytes);
        let info = StivaleInfo::from_addr(&mem, PhysAddr(BASE)).unwrap();

        let tags: Vec<Tag> = info.tags().collect();
        assert_eq!(tags.len(), 5);
        match tags[0] {
            Tag::CommandLine(cmd) => assert_eq!(cmd, b"loglevel=trace nosmp"),
            other => panic!("unexpected {:?}", other),
        }
        match tags[1] {
            Tag::MemoryMap(map) => {
                let entries: Vec<_> = map.entries().collect();
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].length, 0x9_F000);
                assert_eq!(entries[1].entry_type, MemmapType::KERNEL_AND_MODULES);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(tags[2], Tag::Unknown(TagId(0x1234))));
        assert!(matches!(tags[3], Tag::Rsdp(0xE_0000)));
        match tags[4] {
            Tag::Smp(smp) => {
                assert_eq!(smp.flags & SmpTag::FLAG_X2APIC, 1);
                assert_eq!(smp.cpu_count(), 2);
                let ids: Vec<u32> = smp.cpus().map(|c| c.lapic_id).collect();
                assert_eq!(ids, [0, 1]);
                assert_eq!(smp.cpus().nth(1).unwrap().target_stack, 0x7000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn framebuffer_and_modules() {
        let mut fb = u64s(&[0xFD00_0000]);
        for v in [1024u16, 768, 4096, 32] {
            fb.extend_from_slice(&v.to_le_bytes());
        }
        let mut modules = u64s(&[1, 0x20_0000, 0x20_0800]);
        let mut name = [0u8; 128];
        name[..6].copy_from_slice(b"initrd");
        modules.extend_from_slice(&name);

        let image = Image::new("Limine").tag(TagId::FRAMEBUFFER, &fb).tag(TagId::MODULES, &modules);
        let mem = SliceMemory::new(PhysAddr(BASE), &image.bytes);
        let info = StivaleInfo::from_addr(&mem, PhysAddr(BASE)).unwrap();
        let tags: Vec<Tag> = info.tags().collect();

        match tags[0] {
            Tag::Framebuffer(fb) => {
                assert_eq!(fb, FramebufferTag { address: 0xFD00_0000, width: 1024, height: 768, pitch: 4096, bpp: 32 })
            }
            other => panic!("unexpected {:?}", other),
        }
        match tags[1] {
            Tag::Modules(modules) => {
                let all: Vec<Module> = modules.iter().collect();
                assert_eq!(all, [Module { begin: 0x20_0000, end: 0x20_0800, string: b"initrd" }]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cyclic_list_is_cut_off() {
        let mut image = Image::new("Limine").tag(TagId(7), &[]);
        // point the only tag back at itself
        let at = HEADER_SIZE;
        image.bytes[at + 8..at + 16].copy_from_slice(&((BASE + at) as u64).to_le_bytes());
        let mem = SliceMemory::new(PhysAddr(BASE), &image.bytes);
        let info = StivaleInfo::from_addr(&mem, PhysAddr(BASE)).unwrap();
        assert_eq!(info.tags().count(), MAX_TAGS);
    }

    #[test]
    fn dangling_tag_ends_walk() {
        let mut image = Image::new("Limine").tag(TagId::RSDP, &u64s(&[0xE_0000]));
        let at = HEADER_SIZE;
        image.bytes[at + 8..at + 16].copy_from_slice(&0xDEAD_0000u64.to_le_bytes());
        let mem = SliceMemory::new(PhysAddr(BASE), &image.bytes);
        let info = StivaleInfo::from_addr(&mem, PhysAddr(BASE)).unwrap();
        let tags: Vec<Tag> = info.tags().collect();
        assert_eq!(tags.len(), 1);
        assert!(matches!(tags[0], Tag::Rsdp(0xE_0000)));
    }

    #[test]
    fn oversized_memmap_count_ends_walk() {
        let image = Image::new("Limine").tag(TagId::MEMMAP, &u64s(&[u64::MAX]));
        let mem = SliceMemory::new(PhysAddr(BASE), &image.bytes);
        let info = StivaleInfo::from_addr(&mem, PhysAddr(BASE)).unwrap();
        assert_eq!(info.tags().count(), 0);
    }

    #[test]
    fn unreadable_header() {
        let mem = SliceMemory::new(PhysAddr(BASE), &[0u8; 16]);
        assert_eq!(StivaleInfo::from_addr(&mem, PhysAddr(BASE)).err(), Some(Error::Unreadable(BASE)));
    }
}
