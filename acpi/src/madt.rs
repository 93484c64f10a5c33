use amd64::apic::ApicId;
use amd64::ioapic::IoApicId;
use amd64::mem::ReadLe;
use amd64::PhysAddr;

use super::{AcpiError, Sdt, SdtHeader, Signature};

use core::iter::FusedIterator;

/// The Multiple APIC Description Table.
#[derive(Debug, Clone, Copy)]
pub struct Madt<'a> {
    table: Sdt<'a>,
    local_apic_address: u32,
    flags: u32,
}

impl<'a> Madt<'a> {
    pub const SIGNATURE: Signature = Signature(*b"APIC");

    /// Offset of the first interrupt controller record.
    const RECORDS_OFFSET: usize = SdtHeader::SIZE + 8;

    pub fn from_sdt(table: Sdt<'a>) -> Result<Madt<'a>, AcpiError> {
        if table.signature() != Self::SIGNATURE {
            return Err(AcpiError::InvalidSignature(table.address().0));
        }
        let body = table.body();
        match (body.read_u32(0), body.read_u32(4)) {
            (Some(local_apic_address), Some(flags)) => Ok(Madt { table, local_apic_address, flags }),
            _ => Err(AcpiError::InvalidLength { addr: table.address().0, length: table.length() }),
        }
    }

    pub fn table(&self) -> &Sdt<'a> {
        &self.table
    }

    /// Bit 0 reports that legacy 8259 PICs are installed as well.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_legacy_pics(&self) -> bool {
        self.flags & 1 != 0
    }

    /// Returns the physical address at which the local APIC is mapped.
    /// If a local APIC address override is specified, that address is returned,
    /// otherwise, the 32 bit address from the header is returned.
    pub fn local_apic_address(&self) -> PhysAddr {
        let default_addr = PhysAddr(self.local_apic_address as usize);
        self.iter()
            .find_map(|r| match r {
                Ok(MadtEntry::LocalApicAddressOverride(o)) => PhysAddr::from_u64(o.local_apic_address),
                _ => None,
            })
            .unwrap_or(default_addr)
    }

    /// Iterate over all MADT records. A malformed record is reported once and ends the iteration.
    pub fn iter(&self) -> MadtIter<'a> {
        MadtIter { data: self.table.bytes(), offset: Self::RECORDS_OFFSET, done: false }
    }

    /// Number of well formed records.
    pub fn record_count(&self) -> usize {
        self.iter().filter(|r| r.is_ok()).count()
    }

    /// Returns an iterator over all local APICs.
    pub fn processor_local_apics(&self) -> impl Iterator<Item = ProcessorLocalApic> + 'a {
        self.iter().filter_map(|r| match r {
            Ok(MadtEntry::ProcessorLocalApic(lapic)) => Some(lapic),
            _ => None,
        })
    }

    /// Returns an iterator over all IO apics.
    pub fn io_apics(&self) -> impl Iterator<Item = IoApic> + 'a {
        self.iter().filter_map(|r| match r {
            Ok(MadtEntry::IoApic(ioapic)) => Some(ioapic),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MadtIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> MadtIter<'a> {
    fn malformed(&mut self) -> Option<Result<MadtEntry, AcpiError>> {
        self.done = true;
        Some(Err(AcpiError::MalformedRecord { offset: self.offset }))
    }
}

impl<'a> Iterator for MadtIter<'a> {
    type Item = Result<MadtEntry, AcpiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset == self.data.len() {
            return None;
        }
        let (entry_type, length) = match (self.data.read_u8(self.offset), self.data.read_u8(self.offset + 1)) {
            (Some(t), Some(l)) => (t, l as usize),
            _ => return self.malformed(),
        };
        let end = self.offset + length;
        if length < 2 || end > self.data.len() {
            return self.malformed();
        }
        match MadtEntry::decode(entry_type, &self.data[self.offset..end]) {
            Some(entry) => {
                self.offset = end;
                Some(Ok(entry))
            }
            None => self.malformed(),
        }
    }
}

impl<'a> FusedIterator for MadtIter<'a> {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MadtEntry {
    ProcessorLocalApic(ProcessorLocalApic),
    IoApic(IoApic),
    InterruptSourceOverride(InterruptSourceOverride),
    NonMaskableInterrupt(NonMaskableInterrupt),
    LocalApicAddressOverride(LocalApicAddressOverride),
    Unknown { entry_type: u8, length: u8 },
}

impl MadtEntry {
    /// Decode one record, `raw` includes the two byte record header.
    fn decode(entry_type: u8, raw: &[u8]) -> Option<MadtEntry> {
        let entry = match entry_type {
            ProcessorLocalApic::ENTRY_TYPE => MadtEntry::ProcessorLocalApic(ProcessorLocalApic {
                processor_id: raw.read_u8(2)?,
                apic_id: raw.read_u8(3)?,
                flags: LocalApicFlags::from_bits_retain(raw.read_u32(4)?),
            }),
            IoApic::ENTRY_TYPE => MadtEntry::IoApic(IoApic {
                id: raw.read_u8(2)?,
                address: raw.read_u32(4)?,
                global_system_interrupt_base: raw.read_u32(8)?,
            }),
            InterruptSourceOverride::ENTRY_TYPE => MadtEntry::InterruptSourceOverride(InterruptSourceOverride {
                bus_source: raw.read_u8(2)?,
                irq_source: raw.read_u8(3)?,
                global_system_interrupt: raw.read_u32(4)?,
                flags: raw.read_u16(8)?,
            }),
            NonMaskableInterrupt::ENTRY_TYPE => MadtEntry::NonMaskableInterrupt(NonMaskableInterrupt {
                processor_id: raw.read_u8(2)?,
                flags: raw.read_u16(3)?,
                lint: raw.read_u8(5)?,
            }),
            LocalApicAddressOverride::ENTRY_TYPE => MadtEntry::LocalApicAddressOverride(LocalApicAddressOverride {
                local_apic_address: raw.read_u64(4)?,
            }),
            _ => MadtEntry::Unknown { entry_type, length: raw.len() as u8 },
        };
        Some(entry)
    }
}

bitflags::bitflags! {
    /// Flags of a processor local APIC record.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct LocalApicFlags: u32 {
        const ENABLED = 1 << 0;
        /// The processor is disabled but may be brought online by the OS.
        const ONLINE_CAPABLE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProcessorLocalApic {
    processor_id: u8,
    apic_id: u8,
    flags: LocalApicFlags,
}

impl ProcessorLocalApic {
    pub const ENTRY_TYPE: u8 = 0;

    /// Return the ACPI processor ID of the CPU that this APIC belongs to.
    #[inline(always)]
    pub fn processor_id(&self) -> u8 {
        self.processor_id
    }

    /// Return the id of this APIC.
    pub fn apic_id(&self) -> ApicId {
        ApicId(self.apic_id)
    }

    pub fn flags(&self) -> LocalApicFlags {
        self.flags
    }

    /// Check whether the CPU belonging to this APIC is enabled.
    pub fn processor_enabled(&self) -> bool {
        self.flags.contains(LocalApicFlags::ENABLED)
    }

    /// Enabled now or can be enabled by the OS.
    pub fn is_usable(&self) -> bool {
        self.flags.intersects(LocalApicFlags::ENABLED | LocalApicFlags::ONLINE_CAPABLE)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IoApic {
    id: u8,
    address: u32,
    global_system_interrupt_base: u32,
}

impl IoApic {
    pub const ENTRY_TYPE: u8 = 1;

    pub fn id(&self) -> IoApicId {
        IoApicId(self.id)
    }

    /// The 32-bit physical address to access this I/O APIC. Each I/O APIC resides at a unique address.
    pub fn address(&self) -> PhysAddr {
        PhysAddr(self.address as usize)
    }

    /// The global system interrupt number where this I/O APIC’s interrupt
    /// inputs start.
    pub fn global_system_interrupt_base(&self) -> u32 {
        self.global_system_interrupt_base
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct InterruptSourceOverride {
    pub bus_source: u8,
    pub irq_source: u8,
    pub global_system_interrupt: u32,
    /// Consists of
    ///   - polarity (0-2), valid values are `00` (conforms to bus), `01` (active high), `11` (active low)
    ///   - trigger mode (2-4), valid values are `00` (conforms to bus), `01` (edge-triggered), `11` (level-triggered)
    pub flags: u16,
}

impl InterruptSourceOverride {
    pub const ENTRY_TYPE: u8 = 2;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NonMaskableInterrupt {
    /// ACPI Processor ID (0xFF means all processors)
    pub processor_id: u8,
    /// Same flags as for InterruptSourceOverride.
    pub flags: u16,
    /// Local APIC interrupt input `LINTn` to which NMI is connected
    pub lint: u8,
}

impl NonMaskableInterrupt {
    pub const ENTRY_TYPE: u8 = 4;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LocalApicAddressOverride {
    pub local_apic_address: u64,
}

impl LocalApicAddressOverride {
    pub const ENTRY_TYPE: u8 = 5;
}
