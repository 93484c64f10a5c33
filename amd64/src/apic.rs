//! Local APIC driver.
//!
//! The address of the Local APIC is learned from the MADT (see the `acpi`
//! crate). Until then no register may be touched; the driver therefore only
//! comes into existence through [`LocalApic::found`].

use crate::cpu;
use crate::mmio::{MmioWindow, RegisterWindow};
use crate::util::Bits;
use crate::PhysAddr;

use core::fmt;

/// The identifier of an APIC.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct ApicId(pub u8);

impl fmt::Display for ApicId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the processor reports an on-chip APIC.
pub fn supported() -> bool {
    let (_, _, _, edx) = cpu::cpuid(1);
    edx.get_bit(9)
}

/// Base address of the APIC registers according to the APIC base MSR.
pub fn msr_base_address() -> PhysAddr {
    // SAFETY: the APIC base MSR exists whenever `supported()` holds.
    let msr = unsafe { cpu::read_msr(cpu::MSR_APIC_BASE) };
    PhysAddr((msr & 0xFFFF_F000) as usize)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ApicError {
    #[error("APIC {apic_id} did not accept the interrupt command")]
    DeliveryTimeout { apic_id: ApicId },
}

/// The Delivery Mode is a 3 bit field that specifies how the APICs listed in
/// the destination field should act upon reception of this signal.
#[repr(u8)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum DeliveryMode {
    Fixed = 0b000,
    LowestPriority = 0b001,
    SMI = 0b010,
    NMI = 0b100,
    /// All addressed local APICs assume their INIT state.
    INIT = 0b101,
    /// Start the addressed processor at the real mode page given by the vector.
    StartUp = 0b110,
    ExtInt = 0b111,
}

impl DeliveryMode {
    pub fn parse(value: u8) -> Option<DeliveryMode> {
        match value {
            0b000 => Some(DeliveryMode::Fixed),
            0b001 => Some(DeliveryMode::LowestPriority),
            0b010 => Some(DeliveryMode::SMI),
            0b100 => Some(DeliveryMode::NMI),
            0b101 => Some(DeliveryMode::INIT),
            0b110 => Some(DeliveryMode::StartUp),
            0b111 => Some(DeliveryMode::ExtInt),
            _ => None,
        }
    }
}

/// Interpretation of the destination field of an interrupt.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum DestinationMode {
    Physical = 0,
    Logical = 1,
}

#[repr(u8)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum Polarity {
    HighActive = 0,
    LowActive = 1,
}

#[repr(u8)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum TriggerMode {
    EdgeTriggered = 0,
    LevelTriggered = 1,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum DeliveryStatus {
    Idle,
    SendPending,
}

#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum DestinationShorthand {
    NoShorthand = 0b00,
    SelfOnly = 0b01,
    AllIncludingSelf = 0b10,
    AllExcludingSelf = 0b11,
}

/// The low half of the interrupt command register.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct InterruptCommand(u32);

impl InterruptCommand {
    /// A command with the given delivery mode, physical destination, asserted
    /// level, edge trigger and no shorthand.
    pub fn new(mode: DeliveryMode, vector: u8) -> InterruptCommand {
        let mut cmd = InterruptCommand(0);
        cmd.set_vector(vector);
        cmd.set_delivery_mode(mode);
        cmd.set_destination_mode(DestinationMode::Physical);
        cmd.set_level_asserted(true);
        cmd.set_trigger_mode(TriggerMode::EdgeTriggered);
        cmd.set_shorthand(DestinationShorthand::NoShorthand);
        cmd
    }

    pub fn init() -> InterruptCommand {
        Self::new(DeliveryMode::INIT, 0)
    }

    pub fn startup(vector: u8) -> InterruptCommand {
        Self::new(DeliveryMode::StartUp, vector)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn vector(&self) -> u8 {
        self.0.get_bits(0..=7) as u8
    }

    pub fn set_vector(&mut self, vector: u8) {
        self.0.set_bits(0..=7, vector as u32)
    }

    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        DeliveryMode::parse(self.0.get_bits(8..=10) as u8)
    }

    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) {
        self.0.set_bits(8..=10, mode as u32)
    }

    pub fn set_destination_mode(&mut self, mode: DestinationMode) {
        self.0.set_bit(11, mode == DestinationMode::Logical)
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        if self.0.get_bit(12) { DeliveryStatus::SendPending } else { DeliveryStatus::Idle }
    }

    pub fn set_level_asserted(&mut self, asserted: bool) {
        self.0.set_bit(14, asserted)
    }

    pub fn set_trigger_mode(&mut self, mode: TriggerMode) {
        self.0.set_bit(15, mode == TriggerMode::LevelTriggered)
    }

    pub fn set_shorthand(&mut self, shorthand: DestinationShorthand) {
        self.0.set_bits(18..=19, shorthand as u32)
    }
}

/// Number of status polls before an interrupt command is considered lost.
pub const DELIVERY_SPIN_BUDGET: usize = 1_000_000;

/// Vector that spurious interrupts are delivered to once the APIC is enabled.
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Interface to the local APIC of the executing processor.
pub struct LocalApic<W = MmioWindow> {
    regs: W,
    spin_budget: usize,
}

impl LocalApic<MmioWindow> {
    /// Record the address of the memory mapped register block.
    ///
    /// # Safety
    ///
    /// `address` must be the identity mapped Local APIC register block.
    pub unsafe fn found(address: PhysAddr) -> LocalApic<MmioWindow> {
        info!("LAPIC found at {:p}", address);
        LocalApic::with_window(MmioWindow::new(address))
    }
}

impl<W: RegisterWindow> LocalApic<W> {
    pub const ID_REG: usize = 0x20;
    pub const VERSION_REG: usize = 0x30;
    pub const TASK_PRIORITY_REG: usize = 0x80;
    pub const EOI_REG: usize = 0xB0;
    pub const LOGICAL_DESTINATION_REG: usize = 0xD0;
    pub const DESTINATION_FORMAT_REG: usize = 0xE0;
    pub const SPURIOUS_INTERRUPT_VECTOR_REG: usize = 0xF0;
    pub const ICR_LOW_REG: usize = 0x300;
    pub const ICR_HIGH_REG: usize = 0x310;

    pub fn with_window(regs: W) -> LocalApic<W> {
        LocalApic { regs, spin_budget: DELIVERY_SPIN_BUDGET }
    }

    /// Override the number of polls spent waiting for command delivery.
    pub fn with_spin_budget(mut self, spin_budget: usize) -> LocalApic<W> {
        self.spin_budget = spin_budget;
        self
    }

    pub fn window(&self) -> &W {
        &self.regs
    }

    /// Read the given APIC register. Register offsets are multiples of 16.
    #[inline(always)]
    pub fn read(&self, reg: usize) -> u32 {
        assert!(reg % 16 == 0, "misaligned APIC register index");
        self.regs.read(reg)
    }

    /// Write to the given APIC register. Register offsets are multiples of 16.
    #[inline(always)]
    pub fn write(&self, reg: usize, value: u32) {
        assert!(reg % 16 == 0, "misaligned APIC register index");
        trace!("APIC[{:#05x}] <- {:#010x}", reg, value);
        self.regs.write(reg, value)
    }

    /// Put the controller into a state where it accepts every interrupt.
    ///
    /// The legacy PIC must already be disabled (see [`crate::pic::disable`]).
    pub fn initialize(&self) {
        // accept all priorities
        let mut tpr = self.read(Self::TASK_PRIORITY_REG);
        tpr.set_bits(0..=7, 0);
        self.write(Self::TASK_PRIORITY_REG, tpr);

        // flat model, this processor answers to logical id 1
        self.write(Self::DESTINATION_FORMAT_REG, 0xFFFF_FFFF);
        let mut ldr = self.read(Self::LOGICAL_DESTINATION_REG);
        ldr.set_bits(24..=31, 1);
        self.write(Self::LOGICAL_DESTINATION_REG, ldr);

        let mut svr = self.read(Self::SPURIOUS_INTERRUPT_VECTOR_REG);
        svr.set_bits(0..=7, SPURIOUS_VECTOR as u32);
        svr.set_bit(8, true);
        self.write(Self::SPURIOUS_INTERRUPT_VECTOR_REG, svr);
    }

    /// Signal the end of the current interrupt handler by writing to the EOI register.
    #[inline(always)]
    pub fn ack(&self) {
        self.write(Self::EOI_REG, 0);
    }

    /// The APIC id of the processor owning this APIC.
    pub fn id(&self) -> ApicId {
        ApicId(self.read(Self::ID_REG).get_bits(24..=31) as u8)
    }

    pub fn version(&self) -> u8 {
        self.read(Self::VERSION_REG).get_bits(0..=7) as u8
    }

    /// Send an INIT inter-processor interrupt to the given APIC.
    pub fn send_init(&self, apic_id: ApicId) -> Result<(), ApicError> {
        self.send_command(apic_id, InterruptCommand::init())
    }

    /// Send a STARTUP inter-processor interrupt. The target starts executing in
    /// real mode at physical address `vector << 12`.
    pub fn send_startup(&self, apic_id: ApicId, vector: u8) -> Result<(), ApicError> {
        self.send_command(apic_id, InterruptCommand::startup(vector))
    }

    /// Write the destination, then the command, then wait until the APIC has
    /// accepted it.
    pub fn send_command(&self, apic_id: ApicId, command: InterruptCommand) -> Result<(), ApicError> {
        let mut high = 0u32;
        high.set_bits(24..=31, apic_id.0 as u32);
        self.write(Self::ICR_HIGH_REG, high);
        self.write(Self::ICR_LOW_REG, command.raw());
        self.wait_for_delivery(apic_id)
    }

    fn wait_for_delivery(&self, apic_id: ApicId) -> Result<(), ApicError> {
        for _ in 0..self.spin_budget {
            let status = InterruptCommand(self.read(Self::ICR_LOW_REG)).delivery_status();
            if status == DeliveryStatus::Idle {
                return Ok(());
            }
            cpu::relax();
        }
        warn!("APIC {} still has a command pending", apic_id);
        Err(ApicError::DeliveryTimeout { apic_id })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    use core::cell::RefCell;
    use std::collections::BTreeMap;
    use std::vec::Vec;

    /// Register file that records every write.
    #[derive(Default)]
    pub struct RecordingWindow {
        pub regs: RefCell<BTreeMap<usize, u32>>,
        pub writes: RefCell<Vec<(usize, u32)>>,
        /// Keeps the delivery status bit set on every ICR read.
        pub stuck: bool,
    }

    impl RegisterWindow for RecordingWindow {
        fn read(&self, offset: usize) -> u32 {
            let value = self.regs.borrow().get(&offset).copied().unwrap_or(0);
            if self.stuck && offset == LocalApic::<RecordingWindow>::ICR_LOW_REG {
                value | (1 << 12)
            } else {
                value
            }
        }

        fn write(&self, offset: usize, value: u32) {
            self.regs.borrow_mut().insert(offset, value);
            self.writes.borrow_mut().push((offset, value));
        }
    }

    type TestApic = LocalApic<RecordingWindow>;

    #[test]
    fn command_encodings() {
        assert_eq!(InterruptCommand::init().raw(), 0x0000_4500);
        assert_eq!(InterruptCommand::startup(0x08).raw(), 0x0000_4608);
        assert_eq!(InterruptCommand::startup(0x08).delivery_mode(), Some(DeliveryMode::StartUp));
    }

    #[test]
    fn initialize_enables_controller() {
        let apic = TestApic::with_window(RecordingWindow::default());
        apic.window().regs.borrow_mut().insert(TestApic::TASK_PRIORITY_REG, 0x20);
        apic.initialize();

        let regs = apic.window().regs.borrow();
        assert_eq!(regs[&TestApic::TASK_PRIORITY_REG], 0);
        assert_eq!(regs[&TestApic::DESTINATION_FORMAT_REG], 0xFFFF_FFFF);
        assert_eq!(regs[&TestApic::LOGICAL_DESTINATION_REG], 0x0100_0000);
        assert_eq!(regs[&TestApic::SPURIOUS_INTERRUPT_VECTOR_REG], 0x1FF);
    }

    #[test]
    fn ack_writes_zero_to_eoi() {
        let apic = TestApic::with_window(RecordingWindow::default());
        apic.ack();
        assert_eq!(*apic.window().writes.borrow(), [(TestApic::EOI_REG, 0)]);
    }

    #[test]
    fn id_is_read_from_upper_byte() {
        let apic = TestApic::with_window(RecordingWindow::default());
        apic.window().regs.borrow_mut().insert(TestApic::ID_REG, 0x0300_0000);
        assert_eq!(apic.id(), ApicId(3));
    }

    #[test]
    fn ipis_program_destination_before_command() {
        let apic = TestApic::with_window(RecordingWindow::default());
        apic.send_init(ApicId(2)).unwrap();
        apic.send_startup(ApicId(2), 0x08).unwrap();
        assert_eq!(
            *apic.window().writes.borrow(),
            [
                (TestApic::ICR_HIGH_REG, 0x0200_0000),
                (TestApic::ICR_LOW_REG, 0x4500),
                (TestApic::ICR_HIGH_REG, 0x0200_0000),
                (TestApic::ICR_LOW_REG, 0x4608),
            ]
        );
    }

    #[test]
    fn pending_delivery_times_out() {
        let window = RecordingWindow { stuck: true, ..Default::default() };
        let apic = TestApic::with_window(window).with_spin_budget(16);
        assert_eq!(
            apic.send_init(ApicId(1)),
            Err(ApicError::DeliveryTimeout { apic_id: ApicId(1) })
        );
    }

    #[test]
    #[should_panic(expected = "misaligned APIC register index")]
    fn rejects_unaligned_register() {
        TestApic::with_window(RecordingWindow::default()).read(0x24);
    }
}
