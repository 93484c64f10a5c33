//! Bootloader protocol detection and dispatch.

mod multiboot2;
mod stivale2;

use crate::range::MemoryRange;
use crate::{HandoverError, HandoverRecord};

use amd64::mem::PhysMemory;
use amd64::PhysAddr;

/// The boot protocols the kernel can be started with.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BootProtocol {
    Multiboot2,
    Stivale2,
}

impl BootProtocol {
    pub fn from_magic(magic: u32) -> Option<BootProtocol> {
        match magic {
            ::multiboot2::BOOTLOADER_MAGIC => Some(BootProtocol::Multiboot2),
            ::stivale2::BOOTLOADER_MAGIC => Some(BootProtocol::Stivale2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BootProtocol::Multiboot2 => "multiboot2",
            BootProtocol::Stivale2 => "stivale2",
        }
    }
}

pub fn is_multiboot2(magic: u32) -> bool {
    BootProtocol::from_magic(magic) == Some(BootProtocol::Multiboot2)
}

pub fn is_stivale2(magic: u32) -> bool {
    BootProtocol::from_magic(magic) == Some(BootProtocol::Stivale2)
}

/// Decode the boot information at `header` using the protocol selected by `magic`.
pub fn parse<M: PhysMemory>(mem: &M, header: PhysAddr, magic: u32) -> Result<HandoverRecord, HandoverError> {
    let protocol = BootProtocol::from_magic(magic).ok_or(HandoverError::UnsupportedMagic(magic))?;

    info!("Parsing handover informations...");
    info!("Header={:p}, Magic={:#010x} ({})", header, magic, protocol.name());

    match protocol {
        BootProtocol::Multiboot2 => multiboot2::parse(mem, header),
        BootProtocol::Stivale2 => stivale2::parse(mem, header),
    }
}

/// Convert a reported memory map entry, rejecting entries beyond the address width.
fn reported_range(base: u64, length: u64) -> Option<MemoryRange> {
    let base = usize::try_from(base).ok()?;
    let length = usize::try_from(length).ok()?;
    base.checked_add(length)?;
    Some(MemoryRange::new(base, length))
}
