//! Busy-wait delays on top of channel 2 of the programmable interval timer.

use crate::cpu::{inb, outb, relax};

const CHANNEL2_DATA: u16 = 0x42;
const MODE_COMMAND: u16 = 0x43;
/// Keyboard controller port B, which gates channel 2 and exposes its output.
const PORT_B: u16 = 0x61;

/// Input clock of the PIT in Hz.
pub const FREQUENCY: u32 = 1_193_182;

/// Longest delay that fits into one 16 bit countdown.
const MAX_CHUNK_US: u64 = 50_000;

/// Number of PIT ticks that make up the given duration.
pub fn ticks_for_us(us: u64) -> u16 {
    let ticks = (FREQUENCY as u64).saturating_mul(us) / 1_000_000;
    ticks.clamp(1, u16::MAX as u64) as u16
}

/// Spin for at least `us` microseconds.
///
/// # Safety
///
/// Performs port I/O on the PIT and must not race with other users of channel 2.
pub unsafe fn busy_wait_us(us: u64) {
    let mut remaining = us;
    while remaining > 0 {
        let chunk = remaining.min(MAX_CHUNK_US);
        one_shot(ticks_for_us(chunk));
        remaining -= chunk;
    }
}

unsafe fn one_shot(ticks: u16) {
    // enable the gate, keep the speaker off
    let port_b = inb(PORT_B);
    outb(PORT_B, (port_b & !0b10) | 0b01);

    // channel 2, lobyte/hibyte, mode 0 (interrupt on terminal count), binary
    outb(MODE_COMMAND, 0b1011_0000);
    outb(CHANNEL2_DATA, ticks as u8);
    outb(CHANNEL2_DATA, (ticks >> 8) as u8);

    // restart the countdown by toggling the gate
    let port_b = inb(PORT_B);
    outb(PORT_B, port_b & !0b01);
    outb(PORT_B, port_b | 0b01);

    // OUT2 goes high on terminal count
    while inb(PORT_B) & 0b10_0000 == 0 {
        relax();
    }
}
