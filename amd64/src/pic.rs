//! Legacy 8259 programmable interrupt controllers.

use crate::cpu::outb;

pub const PIC1_CMD: u16 = 0x0020;
pub const PIC1_DATA: u16 = 0x0021;
pub const PIC2_CMD: u16 = 0x00A0;
pub const PIC2_DATA: u16 = 0x00A1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;

/// Vector offset the PICs are moved to before masking, clear of the CPU exceptions.
const PIC1_OFFSET: u8 = 0x20;
const PIC2_OFFSET: u8 = 0x28;

/// Remap the PICs away from the exception vectors and mask every line, so
/// that only the APICs deliver interrupts from now on.
///
/// # Safety
///
/// Performs port I/O; must run before the Local APIC is enabled.
pub unsafe fn disable() {
    // ICW1: start initialization in cascade mode
    outb(PIC1_CMD, ICW1_INIT | ICW1_ICW4);
    outb(PIC2_CMD, ICW1_INIT | ICW1_ICW4);
    // ICW2: vector offsets
    outb(PIC1_DATA, PIC1_OFFSET);
    outb(PIC2_DATA, PIC2_OFFSET);
    // ICW3: slave sits on IRQ2 of the master
    outb(PIC1_DATA, 1 << 2);
    outb(PIC2_DATA, 2);
    // ICW4: 8086 mode
    outb(PIC1_DATA, ICW4_8086);
    outb(PIC2_DATA, ICW4_8086);

    outb(PIC1_DATA, 0xFF);
    outb(PIC2_DATA, 0xFF);
    debug!("legacy PIC masked");
}
