use super::reported_range;
use crate::record::{CpuDescriptor, Framebuffer, HandoverBuilder, MemoryMapEntryKind, SmpFlags};
use crate::{HandoverError, HandoverRecord};

use ::stivale2::{MemmapType, StivaleInfo, Tag};
use amd64::mem::PhysMemory;
use amd64::PhysAddr;

fn entry_kind(entry_type: MemmapType) -> MemoryMapEntryKind {
    match entry_type {
        MemmapType::USABLE | MemmapType::KERNEL_AND_MODULES => MemoryMapEntryKind::Available,
        MemmapType::ACPI_RECLAIMABLE => MemoryMapEntryKind::AcpiReclaimable,
        MemmapType::ACPI_NVS => MemoryMapEntryKind::Nvs,
        MemmapType::BAD_MEMORY => MemoryMapEntryKind::BadRam,
        _ => MemoryMapEntryKind::Reserved,
    }
}

pub(super) fn parse<M: PhysMemory>(mem: &M, header: PhysAddr) -> Result<HandoverRecord, HandoverError> {
    let info = StivaleInfo::from_addr(mem, header)?;

    let mut builder = HandoverBuilder::new();
    builder.bootloader_name(info.bootloader_brand());

    for tag in info.tags() {
        match tag {
            Tag::CommandLine(cmd_line) => {
                builder.command_line(cmd_line);
            }
            Tag::MemoryMap(memmap) => {
                for entry in memmap.entries() {
                    match reported_range(entry.base, entry.length) {
                        Some(range) => {
                            builder.push_memory_map_entry(range, entry_kind(entry.entry_type));
                        }
                        None => warn!("stivale2: skipping memory map entry {:#x}+{:#x}", entry.base, entry.length),
                    }
                }
            }
            Tag::Framebuffer(fb) => {
                builder.framebuffer(Framebuffer {
                    address: fb.address,
                    width: fb.width.into(),
                    height: fb.height.into(),
                    pitch: fb.pitch.into(),
                    bpp: fb.bpp,
                });
            }
            Tag::Modules(modules) => {
                for module in modules.iter() {
                    match (usize::try_from(module.begin), usize::try_from(module.end)) {
                        (Ok(begin), Ok(end)) => {
                            builder.push_module(begin, end, module.string);
                        }
                        _ => warn!("stivale2: skipping module at {:#x}", module.begin),
                    }
                }
            }
            Tag::Rsdp(rsdp) => match PhysAddr::from_u64(rsdp) {
                Some(rsdp) => {
                    builder.firmware_root(rsdp);
                }
                None => warn!("stivale2: RSDP at {:#x} is out of reach", rsdp),
            },
            Tag::Smp(smp) => {
                builder.smp(smp.bsp_lapic_id, SmpFlags::from_bits_truncate(smp.flags));
                for cpu in smp.cpus() {
                    builder.push_cpu(CpuDescriptor {
                        processor_uid: cpu.processor_id,
                        local_apic_id: cpu.lapic_id,
                        target_stack: cpu.target_stack,
                        entry_address: cpu.goto_address,
                        extra_argument: cpu.extra_argument,
                    });
                }
            }
            Tag::Unknown(id) => debug!("stivale2: skipping tag {:#x}", id.0),
        }
    }

    Ok(builder.build())
}

#[cfg(test)]
mod test {
    use crate::range::MemoryRange;
    use crate::record::{MemoryMapEntryKind, SmpFlags, COMMAND_LINE_SIZE};

    use ::stivale2::TagId;
    use amd64::mem::SliceMemory;
    use amd64::PhysAddr;
    use std::vec::Vec;

    const BASE: usize = 0x7_0000;
    const MAGIC: u32 = ::stivale2::BOOTLOADER_MAGIC;

    /// Lays out a stivale2 structure, tags are linked in the order they are added.
    struct Image {
        bytes: Vec<u8>,
        link: usize,
    }

    impl Image {
        fn new() -> Image {
            let mut bytes = std::vec![0u8; 136];
            bytes[..6].copy_from_slice(b"Limine");
            Image { bytes, link: 128 }
        }

        fn tag(mut self, id: TagId, body: &[u8]) -> Image {
            let at = self.bytes.len();
            let addr = (BASE + at) as u64;
            self.bytes[self.link..self.link + 8].copy_from_slice(&addr.to_le_bytes());
            self.bytes.extend_from_slice(&id.0.to_le_bytes());
            self.bytes.extend_from_slice(&0u64.to_le_bytes());
            self.bytes.extend_from_slice(body);
            self.link = at + 8;
            self
        }

        fn string(mut self, text: &[u8]) -> (Image, u64) {
            let at = self.bytes.len();
            self.bytes.extend_from_slice(text);
            self.bytes.push(0);
            (self, (BASE + at) as u64)
        }

        fn parse(&self) -> crate::HandoverRecord {
            let mem = SliceMemory::new(PhysAddr(BASE), &self.bytes);
            crate::parse(&mem, PhysAddr(BASE), MAGIC).unwrap()
        }
    }

    fn memmap(entries: &[(u64, u64, u32)]) -> Vec<u8> {
        let mut body = (entries.len() as u64).to_le_bytes().to_vec();
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
        let record = Image::new().tag(TagId::MEMMAP, &memmap(&[(0x10_0000, 0x1000, 1), (0x10_1000, 0x800, 2)])).parse();

        let map = record.memory_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].range, MemoryRange::new(0x10_0000, 0x1000));
        assert_eq!(map[0].kind, MemoryMapEntryKind::Available);
        assert_eq!(map[1].range, MemoryRange::new(0x10_1000, 0x800));
        assert_eq!(map[1].kind, MemoryMapEntryKind::Reserved);
        assert_eq!(record.memory_usable(), 0x1000);
        assert_eq!(record.bootloader(), "Limine");
    }

    #[test]
    fn memory_map_order_and_classification() {
        let types = [1u32, 2, 3, 4, 5, 0x1000, 0x1001, 0x1002, 77];
        let expected = [
            MemoryMapEntryKind::Available,
            MemoryMapEntryKind::Reserved,
            MemoryMapEntryKind::AcpiReclaimable,
            MemoryMapEntryKind::Nvs,
            MemoryMapEntryKind::BadRam,
            MemoryMapEntryKind::Reserved,
            MemoryMapEntryKind::Available,
            MemoryMapEntryKind::Reserved,
            MemoryMapEntryKind::Reserved,
        ];
        let entries: Vec<(u64, u64, u32)> =
            types.iter().enumerate().map(|(i, &ty)| (0x10_0000 * (i as u64 + 1), 0x1000 * (i as u64 + 1), ty)).collect();
        let record = Image::new().tag(TagId::MEMMAP, &memmap(&entries)).parse();

        let map = record.memory_map();
        assert_eq!(map.len(), types.len());
        for (i, entry) in map.iter().enumerate() {
            assert_eq!(entry.range.base, entries[i].0 as usize);
            assert_eq!(entry.kind, expected[i], "entry {}", i);
        }
        // USABLE (index 0) and KERNEL_AND_MODULES (index 6)
        assert_eq!(record.memory_usable(), 0x1000 + 0x7000);
    }

    #[test]
    fn entries_beyond_address_width_are_skipped() {
        let record = Image::new()
            .tag(TagId::MEMMAP, &memmap(&[(u64::MAX - 0xFFF, 0x2000, 1), (0x10_0000, 0x1000, 1)]))
            .parse();
        assert_eq!(record.memory_map().len(), 1);
        assert_eq!(record.memory_usable(), 0x1000);
    }

    #[test]
    fn command_line_and_rsdp() {
        let (image, cmd) = Image::new().string(b"loglevel=debug");
        let record = image.tag(TagId::CMDLINE, &cmd.to_le_bytes()).tag(TagId::RSDP, &0xF_5A40u64.to_le_bytes()).parse();
        assert_eq!(record.command_line(), "loglevel=debug");
        assert_eq!(record.firmware_root(), Some(PhysAddr(0xF_5A40)));
    }

    #[test]
    fn long_command_line_is_truncated() {
        let long = std::vec![b'a'; COMMAND_LINE_SIZE * 2];
        let (image, cmd) = Image::new().string(&long);
        let record = image.tag(TagId::CMDLINE, &cmd.to_le_bytes()).parse();
        assert_eq!(record.command_line().len(), COMMAND_LINE_SIZE);
    }

    #[test]
    fn modules_and_framebuffer() {
        let mut modules = 1u64.to_le_bytes().to_vec();
        modules.extend_from_slice(&0x30_0010u64.to_le_bytes());
        modules.extend_from_slice(&0x30_2000u64.to_le_bytes());
        let mut label = [0u8; 128];
        label[..7].copy_from_slice(b"ramdisk");
        modules.extend_from_slice(&label);

        let mut fb = 0xFD00_0000u64.to_le_bytes().to_vec();
        for v in [800u16, 600, 3200, 32] {
            fb.extend_from_slice(&v.to_le_bytes());
        }

        let record = Image::new().tag(TagId::MODULES, &modules).tag(TagId::FRAMEBUFFER, &fb).parse();
        assert_eq!(record.modules().len(), 1);
        assert_eq!(record.modules()[0].range, MemoryRange::new(0x30_0000, 0x2000));
        assert_eq!(record.modules()[0].command_line.as_str(), "ramdisk");
        let fb = record.framebuffer();
        assert_eq!((fb.address, fb.width, fb.height, fb.pitch, fb.bpp), (0xFD00_0000, 800, 600, 3200, 32));
    }

    #[test]
    fn smp_tag_fills_cpu_list() {
        let mut smp = 1u64.to_le_bytes().to_vec();
        smp.extend_from_slice(&3u32.to_le_bytes());
        smp.extend_from_slice(&0u32.to_le_bytes());
        smp.extend_from_slice(&2u64.to_le_bytes());
        for (uid, lapic) in [(0u32, 3u32), (1, 5)] {
            smp.extend_from_slice(&uid.to_le_bytes());
            smp.extend_from_slice(&lapic.to_le_bytes());
            smp.extend_from_slice(&0x8_0000u64.to_le_bytes());
            smp.extend_from_slice(&0u64.to_le_bytes());
            smp.extend_from_slice(&(lapic as u64).to_le_bytes());
        }

        let record = Image::new().tag(TagId(0xABCD), &[]).tag(TagId::SMP, &smp).parse();
        assert_eq!(record.bsp_lapic_id(), 3);
        assert_eq!(record.smp_flags(), SmpFlags::X2APIC);
        let ids: Vec<u32> = record.cpus().iter().map(|c| c.local_apic_id).collect();
        assert_eq!(ids, [3, 5]);
        assert_eq!(record.cpus()[1].extra_argument, 5);
        assert_eq!(record.cpus()[1].processor_uid, 1);
    }
}
