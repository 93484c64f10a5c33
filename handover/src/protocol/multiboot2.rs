use super::reported_range;
use crate::record::{Framebuffer, HandoverBuilder, MemoryMapEntryKind};
use crate::{HandoverError, HandoverRecord};

use ::multiboot2::memmap::EntryType;
use ::multiboot2::{Multiboot2Info, Tag};
use amd64::mem::PhysMemory;
use amd64::PhysAddr;

fn entry_kind(entry_type: EntryType) -> MemoryMapEntryKind {
    match entry_type {
        EntryType::AVAILABLE => MemoryMapEntryKind::Available,
        EntryType::AVAILABLE_ACPI => MemoryMapEntryKind::AcpiReclaimable,
        EntryType::RESERVED_HIBERNATION => MemoryMapEntryKind::Nvs,
        EntryType::DEFECTIVE => MemoryMapEntryKind::BadRam,
        _ => MemoryMapEntryKind::Reserved,
    }
}

/// Multiboot2 has no SMP tag, so the CPU list stays empty.
pub(super) fn parse<M: PhysMemory>(mem: &M, header: PhysAddr) -> Result<HandoverRecord, HandoverError> {
    let info = Multiboot2Info::from_addr(mem, header)?;

    let mut builder = HandoverBuilder::new();
    let mut old_rsdp = None;
    let mut new_rsdp = None;

    for tag in info.tags() {
        match tag {
            Tag::BootCommandLine(cmd_line) => {
                builder.command_line(cmd_line);
            }
            Tag::BootLoaderName(name) => {
                builder.bootloader_name(name);
            }
            Tag::Module(module) => {
                builder.push_module(module.mod_start().0, module.mod_end().0, module.cmd_line());
            }
            Tag::BasicMemoryInfo { mem_lower_kib, mem_upper_kib } => {
                debug!("multiboot2: lower memory {}KiB, upper memory {}KiB", mem_lower_kib, mem_upper_kib);
            }
            Tag::MemoryMap(memmap) => {
                for region in memmap.regions() {
                    match reported_range(region.base_addr(), region.length()) {
                        Some(range) => {
                            builder.push_memory_map_entry(range, entry_kind(region.entry_type()));
                        }
                        None => warn!(
                            "multiboot2: skipping memory map entry {:#x}+{:#x}",
                            region.base_addr(),
                            region.length()
                        ),
                    }
                }
            }
            Tag::Framebuffer(fb) => {
                builder.framebuffer(Framebuffer {
                    address: fb.address,
                    width: fb.width,
                    height: fb.height,
                    pitch: fb.pitch,
                    bpp: fb.bpp.into(),
                });
            }
            Tag::AcpiOldRsdp(rsdp) => old_rsdp = Some(rsdp),
            Tag::AcpiNewRsdp(rsdp) => new_rsdp = Some(rsdp),
            Tag::Other(tag_type, _) => debug!("multiboot2: skipping tag {}", tag_type.0),
        }
    }

    if let Some(rsdp) = new_rsdp.or(old_rsdp) {
        builder.firmware_root(rsdp);
    }

    Ok(builder.build())
}

#[cfg(test)]
mod test {
    use crate::range::MemoryRange;
    use crate::record::MemoryMapEntryKind;

    use amd64::mem::SliceMemory;
    use amd64::PhysAddr;
    use std::vec::Vec;

    const BASE: usize = 0x1_0000;
    const MAGIC: u32 = ::multiboot2::BOOTLOADER_MAGIC;

    /// Builds a Multiboot2 information structure.
    struct Info {
        bytes: Vec<u8>,
    }

    impl Info {
        fn new() -> Info {
            Info { bytes: std::vec![0; 8] }
        }

        fn tag(mut self, tag_type: u32, body: &[u8]) -> Info {
            self.bytes.extend_from_slice(&tag_type.to_le_bytes());
            self.bytes.extend_from_slice(&(8 + body.len() as u32).to_le_bytes());
            self.bytes.extend_from_slice(body);
            while self.bytes.len() % 8 != 0 {
                self.bytes.push(0);
            }
            self
        }

        fn parse(self) -> crate::HandoverRecord {
            let mut bytes = self.tag(0, &[]).bytes;
            let total = bytes.len() as u32;
            bytes[0..4].copy_from_slice(&total.to_le_bytes());
            let mem = SliceMemory::new(PhysAddr(BASE), &bytes);
            crate::parse(&mem, PhysAddr(BASE), MAGIC).unwrap()
        }
    }

    fn memmap(entries: &[(u64, u64, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&24u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        for &(base, length, ty) in entries {
            body.extend_from_slice(&base.to_le_bytes());
            body.extend_from_slice(&length.to_le_bytes());
            body.extend_from_slice(&ty.to_le_bytes());
            body.extend_from_slice(&0u32.to_le_bytes());
        }
        body
    }

    #[test]
    fn two_entry_example() {
        let record = Info::new().tag(6, &memmap(&[(0x10_0000, 0x1000, 1), (0x10_1000, 0x800, 2)])).parse();
        let map = record.memory_map();
        assert_eq!(map.len(), 2);
        assert_eq!((map[0].range, map[0].kind), (MemoryRange::new(0x10_0000, 0x1000), MemoryMapEntryKind::Available));
        assert_eq!((map[1].range, map[1].kind), (MemoryRange::new(0x10_1000, 0x800), MemoryMapEntryKind::Reserved));
        assert_eq!(record.memory_usable(), 0x1000);
    }

    #[test]
    fn memory_map_order_and_classification() {
        let entries = [
            (0x0, 0x9_FC00, 1),
            (0xF_0000, 0x1_0000, 2),
            (0x10_0000, 0x10_0000, 3),
            (0x20_0000, 0x1000, 4),
            (0x30_0000, 0x1000, 5),
            (0x40_0000, 0x4000, 1),
            (0xFFFC_0000, 0x4_0000, 12),
        ];
        let record = Info::new().tag(6, &memmap(&entries)).parse();
        let kinds: Vec<MemoryMapEntryKind> = record.memory_map().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                MemoryMapEntryKind::Available,
                MemoryMapEntryKind::Reserved,
                MemoryMapEntryKind::AcpiReclaimable,
                MemoryMapEntryKind::Nvs,
                MemoryMapEntryKind::BadRam,
                MemoryMapEntryKind::Available,
                MemoryMapEntryKind::Reserved,
            ]
        );
        assert_eq!(record.memory_usable(), 0x9_FC00 + 0x4000);
    }

    #[test]
    fn strings_modules_and_new_rsdp() {
        let mut module = Vec::new();
        module.extend_from_slice(&0x20_0000u32.to_le_bytes());
        module.extend_from_slice(&0x20_0800u32.to_le_bytes());
        module.extend_from_slice(b"/boot/initrd\0");

        let info = Info::new()
            .tag(1, b"nosmp loglevel=warn\0")
            .tag(2, b"GRUB 2.06\0")
            .tag(3, &module)
            .tag(14, &[0u8; 20])
            .tag(15, &[0u8; 36])
            .tag(99, &[1, 2, 3]);
        let record = info.parse();

        assert_eq!(record.command_line(), "nosmp loglevel=warn");
        assert_eq!(record.bootloader(), "GRUB 2.06");
        assert_eq!(record.modules()[0].range, MemoryRange::new(0x20_0000, 0x1000));
        assert_eq!(record.modules()[0].command_line.as_str(), "/boot/initrd");
        // header (8) + cmdline (32) + name (24) + module (32) + old rsdp (32), then the new rsdp body
        assert_eq!(record.firmware_root(), Some(PhysAddr(BASE + 8 + 32 + 24 + 32 + 32 + 8)));
        assert!(record.cpus().is_empty());
        assert_eq!(record.bsp_lapic_id(), 0);
    }

    #[test]
    fn old_rsdp_is_used_alone() {
        let record = Info::new().tag(14, &[0u8; 20]).parse();
        assert_eq!(record.firmware_root(), Some(PhysAddr(BASE + 16)));
    }
}
