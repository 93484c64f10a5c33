//! The bootloader independent description of the machine.

use crate::range::MemoryRange;
use crate::text;

use amd64::PhysAddr;

use core::fmt;
use heapless::{String, Vec};
use static_assertions::const_assert;

pub const BOOTLOADER_NAME_SIZE: usize = 64;
pub const COMMAND_LINE_SIZE: usize = 512;
pub const MODULE_LABEL_SIZE: usize = 128;

pub const MEMORY_MAP_CAPACITY: usize = 64;
pub const MODULES_CAPACITY: usize = 16;
/// Upper bound on the number of logical CPUs that are tracked.
pub const MAX_CPU_COUNT: usize = 64;

// xAPIC ids are 8 bits wide
const_assert!(MAX_CPU_COUNT <= 256);
const_assert!(MODULE_LABEL_SIZE <= COMMAND_LINE_SIZE);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryMapEntryKind {
    Available,
    Reserved,
    AcpiReclaimable,
    Nvs,
    BadRam,
    Kernel,
}

impl MemoryMapEntryKind {
    pub fn name(self) -> &'static str {
        match self {
            MemoryMapEntryKind::Available => "AVAILABLE",
            MemoryMapEntryKind::Reserved => "RESERVED",
            MemoryMapEntryKind::AcpiReclaimable => "ACPI",
            MemoryMapEntryKind::Nvs => "NVS",
            MemoryMapEntryKind::BadRam => "BADRAM",
            MemoryMapEntryKind::Kernel => "KERNEL",
        }
    }

    /// Whether entries of this kind count towards the usable memory total.
    pub fn is_usable(self) -> bool {
        matches!(self, MemoryMapEntryKind::Available | MemoryMapEntryKind::Kernel)
    }
}

/// A memory map entry, holding the range exactly as reported by the bootloader.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub range: MemoryRange,
    pub kind: MemoryMapEntryKind,
}

impl MemoryMapEntry {
    /// The page aligned part of the entry that an allocator may hand out.
    pub fn usable_range(&self) -> MemoryRange {
        MemoryRange::from_non_aligned(self.range.base, self.range.size)
    }
}

/// A blob loaded next to the kernel by the bootloader.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Module {
    /// Page aligned range covering the module.
    pub range: MemoryRange,
    pub command_line: String<MODULE_LABEL_SIZE>,
}

/// Linear framebuffer set up by the bootloader, all zero when none was reported.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Framebuffer {
    pub address: u64,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u16,
}

impl Framebuffer {
    pub fn is_present(&self) -> bool {
        self.address != 0
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct SmpFlags: u64 {
        /// Cores were left in x2APIC mode.
        const X2APIC = 1 << 0;
    }
}

/// A logical CPU as reported by the bootloader or the firmware.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct CpuDescriptor {
    pub processor_uid: u32,
    pub local_apic_id: u32,
    pub target_stack: u64,
    pub entry_address: u64,
    pub extra_argument: u64,
}

/// Everything the kernel learned from the bootloader. Read only once built.
#[derive(Clone)]
pub struct HandoverRecord {
    bootloader: String<BOOTLOADER_NAME_SIZE>,
    command_line: String<COMMAND_LINE_SIZE>,
    memory_map: Vec<MemoryMapEntry, MEMORY_MAP_CAPACITY>,
    memory_usable: usize,
    modules: Vec<Module, MODULES_CAPACITY>,
    framebuffer: Framebuffer,
    firmware_root: PhysAddr,
    smp_flags: SmpFlags,
    bsp_lapic_id: u32,
    cpus: Vec<CpuDescriptor, MAX_CPU_COUNT>,
}

impl HandoverRecord {
    pub fn bootloader(&self) -> &str {
        &self.bootloader
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Entries in the order the bootloader reported them.
    pub fn memory_map(&self) -> &[MemoryMapEntry] {
        &self.memory_map
    }

    /// Sum of the sizes of all usable entries, in bytes.
    pub fn memory_usable(&self) -> usize {
        self.memory_usable
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Physical address of the ACPI RSDP, if the bootloader reported one.
    pub fn firmware_root(&self) -> Option<PhysAddr> {
        if self.firmware_root.is_null() {
            None
        } else {
            Some(self.firmware_root)
        }
    }

    pub fn smp_flags(&self) -> SmpFlags {
        self.smp_flags
    }

    pub fn bsp_lapic_id(&self) -> u32 {
        self.bsp_lapic_id
    }

    pub fn cpus(&self) -> &[CpuDescriptor] {
        &self.cpus
    }

    /// Write a human readable report of the record to the log, one record per line.
    pub fn dump(&self) {
        let mut lines = LogLines(String::new());
        let _ = self.write_report(&mut lines);
        lines.flush();
    }

    /// The report logged by [`HandoverRecord::dump`].
    pub fn write_report<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "Bootloader: '{}'", self.bootloader)?;
        writeln!(out, "Command lines: '{}'", self.command_line)?;

        writeln!(out, "Memory map:")?;
        for (i, entry) in self.memory_map.iter().enumerate() {
            writeln!(out, "\t{}: {}: {}", i, InclusiveRange(entry.range), entry.kind.name())?;
        }
        writeln!(out, "\t-> Usable memory: {}KiB", self.memory_usable / 1024)?;

        writeln!(out, "Modules:")?;
        for (i, module) in self.modules.iter().enumerate() {
            writeln!(out, "\t{}: {}: {}", i, InclusiveRange(module.range), module.command_line)?;
        }
        writeln!(out, "\t-> {} module(s) found", self.modules.len())?;

        if self.framebuffer.is_present() {
            let fb = &self.framebuffer;
            writeln!(out, "Framebuffer: {:#x} {}x{} pitch={} bpp={}", fb.address, fb.width, fb.height, fb.pitch, fb.bpp)?;
        }
        match self.firmware_root() {
            Some(rsdp) => writeln!(out, "ACPI RSDP: {:p}", rsdp)?,
            None => writeln!(out, "ACPI RSDP: none")?,
        }

        writeln!(out, "SMP:")?;
        writeln!(out, "\tFlags: {:#x}", self.smp_flags.bits())?;
        writeln!(out, "\tBSP LAPIC ID: {}", self.bsp_lapic_id)?;
        for (i, cpu) in self.cpus.iter().enumerate() {
            writeln!(
                out,
                "\tProcessor {} ID: {} LAPIC ID: {} stack={:#x} goto={:#x} arg={:#x}",
                i, cpu.processor_uid, cpu.local_apic_id, cpu.target_stack, cpu.entry_address, cpu.extra_argument
            )?;
        }
        writeln!(out, "\t-> {} cpu(s) found", self.cpus.len())
    }
}

const LOG_LINE_SIZE: usize = COMMAND_LINE_SIZE + 128;

/// Sends every completed line to the log as its own record.
struct LogLines(String<LOG_LINE_SIZE>);

impl LogLines {
    fn flush(&mut self) {
        if !self.0.is_empty() {
            info!("{}", self.0);
            self.0.clear();
        }
    }
}

impl fmt::Write for LogLines {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if c == '\n' {
                self.flush();
            } else if self.0.push(c).is_err() {
                self.flush();
                let _ = self.0.push(c);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HandoverRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HandoverRecord")
            .field("bootloader", &self.bootloader)
            .field("memory_map", &self.memory_map.len())
            .field("memory_usable", &self.memory_usable)
            .field("modules", &self.modules.len())
            .field("cpus", &self.cpus.len())
            .finish()
    }
}

/// Formats a range as `first-last`, both inclusive.
struct InclusiveRange(MemoryRange);

impl fmt::Display for InclusiveRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let last = self.0.end().saturating_sub(1).max(self.0.base);
        write!(f, "{:#010x}-{:#010x}", self.0.base, last)
    }
}

/// The only way to fill in a [`HandoverRecord`].
pub struct HandoverBuilder {
    record: HandoverRecord,
}

impl Default for HandoverBuilder {
    fn default() -> HandoverBuilder {
        HandoverBuilder::new()
    }
}

impl HandoverBuilder {
    pub fn new() -> HandoverBuilder {
        HandoverBuilder {
            record: HandoverRecord {
                bootloader: String::new(),
                command_line: String::new(),
                memory_map: Vec::new(),
                memory_usable: 0,
                modules: Vec::new(),
                framebuffer: Framebuffer::default(),
                firmware_root: PhysAddr(0),
                smp_flags: SmpFlags::empty(),
                bsp_lapic_id: 0,
                cpus: Vec::new(),
            },
        }
    }

    pub fn bootloader_name(&mut self, name: &[u8]) -> &mut Self {
        self.record.bootloader = text::bounded(name);
        self
    }

    pub fn command_line(&mut self, cmd_line: &[u8]) -> &mut Self {
        self.record.command_line = text::bounded(cmd_line);
        self
    }

    /// Append a memory map entry. Usable entries add to the usable memory total.
    pub fn push_memory_map_entry(&mut self, range: MemoryRange, kind: MemoryMapEntryKind) -> &mut Self {
        match self.record.memory_map.push(MemoryMapEntry { range, kind }) {
            Ok(()) => {
                if kind.is_usable() {
                    self.record.memory_usable = self.record.memory_usable.saturating_add(range.size);
                }
            }
            Err(_) => warn!("handover: memory map full, dropping {:?} {}", range, kind.name()),
        }
        self
    }

    /// Append a module spanning `[begin, end)`, the range is grown to whole pages.
    pub fn push_module(&mut self, begin: usize, end: usize, label: &[u8]) -> &mut Self {
        let range = MemoryRange::around_non_aligned(begin, end.saturating_sub(begin));
        let module = Module { range, command_line: text::bounded(label) };
        if self.record.modules.push(module).is_err() {
            warn!("handover: too many modules, dropping {:?}", range);
        }
        self
    }

    pub fn framebuffer(&mut self, framebuffer: Framebuffer) -> &mut Self {
        self.record.framebuffer = framebuffer;
        self
    }

    pub fn firmware_root(&mut self, rsdp: PhysAddr) -> &mut Self {
        self.record.firmware_root = rsdp;
        self
    }

    pub fn smp(&mut self, bsp_lapic_id: u32, flags: SmpFlags) -> &mut Self {
        self.record.bsp_lapic_id = bsp_lapic_id;
        self.record.smp_flags = flags;
        self
    }

    pub fn push_cpu(&mut self, cpu: CpuDescriptor) -> &mut Self {
        if self.record.cpus.push(cpu).is_err() {
            warn!("handover: more than {} cpus, dropping LAPIC ID {}", MAX_CPU_COUNT, cpu.local_apic_id);
        }
        self
    }

    pub fn build(self) -> HandoverRecord {
        self.record
    }
}
