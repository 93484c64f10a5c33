#![cfg_attr(not(test), no_std)]
//! Architecture support for x86_64: addresses, register bit fields, privileged
//! instructions and the drivers for the two kinds of APIC.

#[macro_use]
extern crate log;

mod addr;
mod align;

pub mod apic;
pub mod cpu;
pub mod ioapic;
pub mod mem;
pub mod mmio;
pub mod pic;
pub mod pit;
pub mod util;

pub use self::addr::*;
pub use self::align::*;

/// Size of a normal page, 4096 bytes.
pub const PAGE_SIZE: usize = 1 << 12;
