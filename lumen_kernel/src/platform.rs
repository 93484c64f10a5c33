//! Processor and interrupt controller topology.
//!
//! The MADT found through the ACPI root pointer is the preferred source. The
//! CPU list the bootloader handed over is used when there is no usable MADT,
//! and otherwise only supplies the start parameters of matching processors.

use acpi::{AcpiError, Madt, MadtEntry, RootTable, Rsdp};
use amd64::apic::ApicId;
use amd64::ioapic::IoApicId;
use amd64::mem::PhysMemory;
use amd64::PhysAddr;
use handover::{CpuDescriptor, HandoverRecord, SmpFlags, MAX_CPU_COUNT};

use heapless::Vec;

/// Upper bound on the number of I/O APICs that are tracked.
pub const MAX_IO_APIC_COUNT: usize = 16;

/// A logical processor that can be started.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Cpu {
    pub apic_id: ApicId,
    pub processor_uid: u32,
    pub target_stack: u64,
    pub entry_address: u64,
    pub extra_argument: u64,
}

impl Cpu {
    pub fn new(apic_id: ApicId, processor_uid: u32) -> Cpu {
        Cpu { apic_id, processor_uid, target_stack: 0, entry_address: 0, extra_argument: 0 }
    }

    fn take_start_parameters(&mut self, desc: &CpuDescriptor) {
        self.target_stack = desc.target_stack;
        self.entry_address = desc.entry_address;
        self.extra_argument = desc.extra_argument;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IoApicInfo {
    pub id: IoApicId,
    pub address: PhysAddr,
    pub gsi_base: u32,
}

/// Where the CPU list of a [`Topology`] came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CpuSource {
    Firmware,
    Bootloader,
}

#[derive(Debug)]
pub struct Topology {
    local_apic: Option<PhysAddr>,
    legacy_pics: bool,
    x2apic: bool,
    io_apics: Vec<IoApicInfo, MAX_IO_APIC_COUNT>,
    cpus: Vec<Cpu, MAX_CPU_COUNT>,
    source: CpuSource,
}

impl Topology {
    /// The topology as far as the bootloader knows it: no interrupt controllers, its CPU list.
    pub fn from_handover(handover: &HandoverRecord) -> Topology {
        let mut cpus = Vec::new();
        for desc in handover.cpus() {
            match u8::try_from(desc.local_apic_id) {
                Ok(id) => {
                    let mut cpu = Cpu::new(ApicId(id), desc.processor_uid);
                    cpu.take_start_parameters(desc);
                    push_unique(&mut cpus, cpu);
                }
                Err(_) => warn!("CPU with APIC id {} requires x2APIC, skipping", desc.local_apic_id),
            }
        }
        Topology {
            local_apic: None,
            legacy_pics: true,
            x2apic: handover.smp_flags().contains(SmpFlags::X2APIC),
            io_apics: Vec::new(),
            cpus,
            source: CpuSource::Bootloader,
        }
    }

    /// Address of the local APIC registers, if the firmware reported one.
    pub fn local_apic_address(&self) -> Option<PhysAddr> {
        self.local_apic
    }

    /// Whether 8259 PICs are present and need to be masked.
    pub fn has_legacy_pics(&self) -> bool {
        self.legacy_pics
    }

    /// Whether the bootloader switched the local APICs to x2APIC mode.
    pub fn x2apic_enabled(&self) -> bool {
        self.x2apic
    }

    pub fn io_apics(&self) -> &[IoApicInfo] {
        &self.io_apics
    }

    /// The processors in discovery order, each APIC id appears once.
    pub fn cpus(&self) -> &[Cpu] {
        &self.cpus
    }

    pub fn cpu_source(&self) -> CpuSource {
        self.source
    }

    pub fn by_apic_id(&self, apic_id: ApicId) -> Option<&Cpu> {
        self.cpus.iter().find(|cpu| cpu.apic_id == apic_id)
    }

    fn apply_madt(&mut self, madt: &Madt, handover: &HandoverRecord) {
        let local_apic = madt.local_apic_address();
        info!("MADT: {} records, LAPIC at {:p}, flags {:#x}", madt.record_count(), local_apic, madt.flags());
        self.local_apic = Some(local_apic);
        self.legacy_pics = madt.has_legacy_pics();

        let mut firmware_cpus = Vec::new();
        for record in madt.iter() {
            match record {
                Ok(MadtEntry::ProcessorLocalApic(lapic)) => {
                    info!(
                        "MADT: LAPIC processor={} id={} flags={:?}",
                        lapic.processor_id(),
                        lapic.apic_id(),
                        lapic.flags()
                    );
                    if lapic.is_usable() {
                        push_unique(&mut firmware_cpus, Cpu::new(lapic.apic_id(), lapic.processor_id().into()));
                    }
                }
                Ok(MadtEntry::IoApic(ioapic)) => {
                    info!(
                        "MADT: IOAPIC id={} address={:p} gsi_base={}",
                        ioapic.id().0,
                        ioapic.address(),
                        ioapic.global_system_interrupt_base()
                    );
                    if ioapic.address().is_null() {
                        warn!("MADT: IOAPIC id {} has no register address, skipping", ioapic.id().0);
                        continue;
                    }
                    let info = IoApicInfo {
                        id: ioapic.id(),
                        address: ioapic.address(),
                        gsi_base: ioapic.global_system_interrupt_base(),
                    };
                    if self.io_apics.push(info).is_err() {
                        warn!("MADT: more than {} IOAPICs, ignoring id {}", MAX_IO_APIC_COUNT, info.id.0);
                    }
                }
                Ok(MadtEntry::InterruptSourceOverride(iso)) => info!(
                    "MADT: ISO bus={} irq={} gsi={} flags={:#06x}",
                    iso.bus_source, iso.irq_source, iso.global_system_interrupt, iso.flags
                ),
                Ok(MadtEntry::NonMaskableInterrupt(nmi)) => info!(
                    "MADT: NMI processor={:#04x} lint={} flags={:#06x}",
                    nmi.processor_id, nmi.lint, nmi.flags
                ),
                Ok(MadtEntry::LocalApicAddressOverride(o)) => {
                    info!("MADT: LAPIC address override {:#x}", o.local_apic_address)
                }
                Ok(MadtEntry::Unknown { entry_type, length }) => {
                    debug!("MADT: skipping record type {} ({} bytes)", entry_type, length)
                }
                Err(err) => warn!("MADT: {}", err),
            }
        }

        if firmware_cpus.is_empty() {
            warn!("MADT lists no usable processor, keeping the bootloader CPU list");
            return;
        }

        for cpu in firmware_cpus.iter_mut() {
            let apic_id = u32::from(cpu.apic_id.0);
            if let Some(desc) = handover.cpus().iter().find(|desc| desc.local_apic_id == apic_id) {
                cpu.take_start_parameters(desc);
            }
        }
        if !self.cpus.is_empty() && self.cpus.len() != firmware_cpus.len() {
            info!("MADT lists {} processors, the bootloader {}", firmware_cpus.len(), self.cpus.len());
        }
        self.cpus = firmware_cpus;
        self.source = CpuSource::Firmware;
    }
}

fn push_unique(cpus: &mut Vec<Cpu, MAX_CPU_COUNT>, cpu: Cpu) {
    if cpus.iter().any(|known| known.apic_id == cpu.apic_id) {
        warn!("APIC id {} listed twice, ignoring the duplicate", cpu.apic_id);
    } else if cpus.push(cpu).is_err() {
        warn!("more than {} CPUs, ignoring APIC id {}", MAX_CPU_COUNT, cpu.apic_id);
    }
}

fn find_madt<'a, M: PhysMemory>(mem: &'a M, rsdp: PhysAddr) -> Result<Madt<'a>, AcpiError> {
    let rsdp = Rsdp::parse(mem, rsdp)?;
    let root = RootTable::from_rsdp(mem, &rsdp)?;
    info!(
        "ACPI: revision {} RSDP, {} at {:p} with {} entries",
        rsdp.revision(),
        root.table().signature(),
        root.table().address(),
        root.entries().count()
    );
    Madt::from_sdt(root.child(mem, Madt::SIGNATURE)?)
}

/// Walk the firmware tables referenced by the handover record.
///
/// Every failure on the way degrades to the bootloader's view of the machine.
pub fn discover<M: PhysMemory>(mem: &M, handover: &HandoverRecord) -> Topology {
    let mut topology = Topology::from_handover(handover);

    let rsdp = match handover.firmware_root() {
        Some(rsdp) => rsdp,
        None => {
            warn!("No ACPI root pointer, interrupt controllers and processors are not discovered");
            return topology;
        }
    };

    match find_madt(mem, rsdp) {
        Ok(madt) => topology.apply_madt(&madt, handover),
        Err(err) => warn!("ACPI: no usable MADT: {}", err),
    }

    info!("{} CPUs ({:?}), {} IOAPICs", topology.cpus.len(), topology.source, topology.io_apics.len());
    topology
}
