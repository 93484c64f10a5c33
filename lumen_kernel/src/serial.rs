//! Output through the legacy 16550 UART.

use amd64::cpu::{self, inb, outb};

use core::fmt;
use spin::Mutex;

pub const COM1_ADDR: u16 = 0x3F8;

pub static COM1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1_ADDR) });

const DATA: u16 = 0;
const INTERRUPT_ENABLE: u16 = 1;
const FIFO_CONTROL: u16 = 2;
const LINE_CONTROL: u16 = 3;
const MODEM_CONTROL: u16 = 4;
const LINE_STATUS: u16 = 5;

/// A serial port identified by its base port number.
#[derive(Debug, Eq, PartialEq)]
pub struct SerialPort(u16);

impl SerialPort {
    /// Creates a new handle to a serial port.
    ///
    /// # Safety
    ///
    /// Two handles to the same port would interleave their output.
    pub const unsafe fn new(port_number: u16) -> SerialPort {
        SerialPort(port_number)
    }

    /// Program 115200 baud, 8 data bits, no parity, one stop bit and enable the FIFO.
    pub fn init(&mut self) {
        unsafe {
            outb(self.0 + INTERRUPT_ENABLE, 0x00);
            // divisor latch access, divisor 1
            outb(self.0 + LINE_CONTROL, 0x80);
            outb(self.0 + DATA, 0x01);
            outb(self.0 + INTERRUPT_ENABLE, 0x00);
            outb(self.0 + LINE_CONTROL, 0x03);
            outb(self.0 + FIFO_CONTROL, 0xC7);
            outb(self.0 + MODEM_CONTROL, 0x0B);
        }
    }

    fn transmit_empty(&self) -> bool {
        unsafe { inb(self.0 + LINE_STATUS) & 0x20 != 0 }
    }

    #[inline]
    pub fn write_byte(&mut self, data: u8) {
        while !self.transmit_empty() {
            cpu::relax();
        }
        unsafe { outb(self.0 + DATA, data) }
    }

    pub fn write(&mut self, data: &[u8]) {
        for &byte in data {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}
