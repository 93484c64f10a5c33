//! I/O APIC driver.
//!
//! The I/O APIC only exposes two registers in its memory window: a selector
//! (`IOREGSEL`) and a data window (`IOWIN`). Every internal register is reached
//! by first writing its index to the selector.

use crate::apic::{DeliveryMode, DeliveryStatus, DestinationMode, Polarity, TriggerMode};
use crate::mmio::{MmioWindow, RegisterWindow};
use crate::util::Bits;
use crate::PhysAddr;

/// The identifier of an IOAPIC.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone)]
pub struct IoApicId(pub u8);

pub struct IoApic<W = MmioWindow> {
    regs: W,
}

impl IoApic<MmioWindow> {
    /// Record the address of the memory mapped register block.
    ///
    /// # Safety
    ///
    /// `address` must be the identity mapped register block of an I/O APIC.
    pub unsafe fn found(address: PhysAddr) -> IoApic<MmioWindow> {
        info!("IOAPIC found at {:p}", address);
        IoApic::with_window(MmioWindow::new(address))
    }
}

impl<W: RegisterWindow> IoApic<W> {
    /// Byte offset of the register selector.
    pub const REGSEL: usize = 0x00;
    /// Byte offset of the data window.
    pub const WIN: usize = 0x10;

    pub const ID_REG: u32 = 0x00;
    pub const VER_REG: u32 = 0x01;
    pub const ARB_REG: u32 = 0x02;
    pub const REDIRECTION_TABLE_BASE: u32 = 0x10;

    pub fn with_window(regs: W) -> IoApic<W> {
        IoApic { regs }
    }

    pub fn window(&self) -> &W {
        &self.regs
    }

    #[inline(always)]
    pub fn read(&self, reg: u32) -> u32 {
        self.regs.write(Self::REGSEL, reg);
        self.regs.read(Self::WIN)
    }

    #[inline(always)]
    pub fn write(&self, reg: u32, value: u32) {
        self.regs.write(Self::REGSEL, reg);
        self.regs.write(Self::WIN, value);
    }

    pub fn id(&self) -> IoApicId {
        IoApicId(self.read(Self::ID_REG).get_bits(24..=27) as u8)
    }

    pub fn version(&self) -> u8 {
        self.read(Self::VER_REG).get_bits(0..=7) as u8
    }

    /// Index of the last redirection entry, i.e. the pin count minus one.
    pub fn max_redirection_entry(&self) -> u8 {
        self.read(Self::VER_REG).get_bits(16..=23) as u8
    }

    pub fn redirection_entry(&self, index: u8) -> RedirectionEntry {
        let reg = Self::REDIRECTION_TABLE_BASE + index as u32 * 2;
        let lo = self.read(reg) as u64;
        let hi = self.read(reg + 1) as u64;
        RedirectionEntry((hi << 32) | lo)
    }

    /// Program a redirection entry, low dword first.
    pub fn set_entry(&self, index: u8, entry: RedirectionEntry) {
        let reg = Self::REDIRECTION_TABLE_BASE + index as u32 * 2;
        self.write(reg, entry.0 as u32);
        self.write(reg + 1, (entry.0 >> 32) as u32);
    }

    /// Mask every redirection entry. Device drivers unmask the lines they own later on.
    pub fn initialize(&self) {
        let count = self.max_redirection_entry() as u32 + 1;
        info!("Total I/O APIC pins = {}", count);

        for index in 0..count {
            self.set_entry(index as u8, RedirectionEntry::masked());
        }
    }
}

/// A 64 bit entry of the redirection table.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct RedirectionEntry(u64);

impl RedirectionEntry {
    /// An entry with only the mask bit set.
    pub fn masked() -> RedirectionEntry {
        RedirectionEntry(1 << 16)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn vector(&self) -> u8 {
        self.0.get_bits(0..=7) as u8
    }

    pub fn set_vector(&mut self, vector: u8) {
        self.0.set_bits(0..=7, vector as u64)
    }

    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        DeliveryMode::parse(self.0.get_bits(8..=10) as u8)
    }

    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) {
        self.0.set_bits(8..=10, mode as u64)
    }

    pub fn destination_mode(&self) -> DestinationMode {
        if self.0.get_bit(11) { DestinationMode::Logical } else { DestinationMode::Physical }
    }

    pub fn set_destination_mode(&mut self, mode: DestinationMode) {
        self.0.set_bit(11, mode == DestinationMode::Logical);
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        if self.0.get_bit(12) { DeliveryStatus::SendPending } else { DeliveryStatus::Idle }
    }

    pub fn set_input_polarity(&mut self, polarity: Polarity) {
        self.0.set_bit(13, polarity == Polarity::LowActive);
    }

    pub fn set_trigger_mode(&mut self, mode: TriggerMode) {
        self.0.set_bit(15, mode == TriggerMode::LevelTriggered);
    }

    pub fn masked_bit(&self) -> bool {
        self.0.get_bit(16)
    }

    pub fn set_masked(&mut self, masked: bool) {
        self.0.set_bit(16, masked);
    }

    pub fn destination(&self) -> u8 {
        self.0.get_bits(56..=63) as u8
    }

    pub fn set_destination(&mut self, dest: u8) {
        self.0.set_bits(56..=63, dest as u64)
    }
}
