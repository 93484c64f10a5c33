#![cfg_attr(not(test), no_std)]
//! Minimal ACPI table decoding: enough to get from the RSDP to the MADT.

#[macro_use]
extern crate log;

pub mod util;
mod madt;
mod root;
mod rsdp;

pub use self::madt::*;
pub use self::root::*;
pub use self::rsdp::*;

use amd64::mem::{PhysMemory, ReadLe};
use amd64::PhysAddr;

use core::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum AcpiError {
    #[error("ACPI structure at {0:#x} is not readable")]
    Unreadable(usize),
    #[error("ACPI structure at {0:#x} has a wrong signature")]
    InvalidSignature(usize),
    #[error("ACPI structure at {0:#x} has an invalid checksum")]
    InvalidChecksum(usize),
    #[error("ACPI table at {addr:#x} declares an invalid length of {length} bytes")]
    InvalidLength { addr: usize, length: usize },
    #[error("no valid {0} table")]
    TableNotFound(Signature),
    #[error("malformed MADT record at offset {offset}")]
    MalformedRecord { offset: usize },
    #[error("ACPI address {0:#x} does not fit the address space")]
    AddressOutOfRange(u64),
}

/// Four character table signature.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Signature(pub [u8; 4]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &c in self.0.iter() {
            let c = if c.is_ascii_graphic() { c as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

/// Header of an ACPI system description table.
#[derive(Debug, Clone, Copy)]
pub struct SdtHeader {
    pub signature: Signature,
    pub length: u32,
    pub revision: u8,
    pub oem_id: [u8; 6],
}

impl SdtHeader {
    pub const SIZE: usize = 36;

    fn parse(raw: &[u8]) -> Option<SdtHeader> {
        let mut signature = [0u8; 4];
        signature.copy_from_slice(raw.get(0..4)?);
        let mut oem_id = [0u8; 6];
        oem_id.copy_from_slice(raw.get(10..16)?);
        Some(SdtHeader { signature: Signature(signature), length: raw.read_u32(4)?, revision: raw.read_u8(8)?, oem_id })
    }
}

/// A system description table whose length and checksum have been validated.
#[derive(Clone, Copy)]
pub struct Sdt<'a> {
    addr: PhysAddr,
    header: SdtHeader,
    data: &'a [u8],
}

impl<'a> Sdt<'a> {
    /// Read the table at `addr` and validate its checksum over the self-reported length.
    pub fn load<M: PhysMemory>(mem: &'a M, addr: PhysAddr) -> Result<Sdt<'a>, AcpiError> {
        let raw = mem.slice(addr, SdtHeader::SIZE).ok_or(AcpiError::Unreadable(addr.0))?;
        let header = SdtHeader::parse(raw).ok_or(AcpiError::Unreadable(addr.0))?;
        let length = header.length as usize;
        if length < SdtHeader::SIZE {
            return Err(AcpiError::InvalidLength { addr: addr.0, length });
        }
        let data = mem.slice(addr, length).ok_or(AcpiError::Unreadable(addr.0))?;
        if util::acpi_checksum(data) != 0 {
            return Err(AcpiError::InvalidChecksum(addr.0));
        }
        Ok(Sdt { addr, header, data })
    }

    pub fn address(&self) -> PhysAddr {
        self.addr
    }

    pub fn header(&self) -> &SdtHeader {
        &self.header
    }

    pub fn signature(&self) -> Signature {
        self.header.signature
    }

    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// The whole table, header included.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// The table contents following the common header.
    pub fn body(&self) -> &'a [u8] {
        &self.data[SdtHeader::SIZE..]
    }
}

impl<'a> fmt::Debug for Sdt<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sdt")
            .field("addr", &self.addr)
            .field("signature", &self.header.signature)
            .field("length", &self.data.len())
            .finish()
    }
}

fn phys_addr(raw: u64) -> Result<PhysAddr, AcpiError> {
    PhysAddr::from_u64(raw).ok_or(AcpiError::AddressOutOfRange(raw))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::vec::Vec;

    /// Build a table with a valid header and checksum around `body`.
    pub fn table(signature: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut data = std::vec![0u8; SdtHeader::SIZE];
        data[0..4].copy_from_slice(signature);
        data[8] = 1;
        data[10..16].copy_from_slice(b"LUMEN ");
        data.extend_from_slice(body);
        let length = data.len() as u32;
        data[4..8].copy_from_slice(&length.to_le_bytes());
        util::fix_checksum(&mut data, 9);
        data
    }

    #[test]
    fn loads_valid_table() {
        let data = table(b"FACP", &[1, 2, 3, 4]);
        let mem = amd64::mem::SliceMemory::new(PhysAddr(0x1000), &data);
        let sdt = Sdt::load(&mem, PhysAddr(0x1000)).unwrap();
        assert_eq!(sdt.signature(), Signature(*b"FACP"));
        assert_eq!(sdt.length(), 40);
        assert_eq!(sdt.body(), &[1, 2, 3, 4]);
        assert_eq!(&sdt.header().oem_id, b"LUMEN ");
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut data = table(b"FACP", &[1, 2, 3, 4]);
        data[36] ^= 0xFF;
        let mem = amd64::mem::SliceMemory::new(PhysAddr(0x1000), &data);
        assert_eq!(Sdt::load(&mem, PhysAddr(0x1000)).unwrap_err(), AcpiError::InvalidChecksum(0x1000));
    }

    #[test]
    fn rejects_short_length() {
        let mut data = table(b"FACP", &[]);
        data[4..8].copy_from_slice(&8u32.to_le_bytes());
        let mem = amd64::mem::SliceMemory::new(PhysAddr(0x1000), &data);
        assert_eq!(
            Sdt::load(&mem, PhysAddr(0x1000)).unwrap_err(),
            AcpiError::InvalidLength { addr: 0x1000, length: 8 }
        );
    }

    #[test]
    fn signature_display() {
        assert_eq!(std::format!("{}", Signature(*b"APIC")), "APIC");
        assert_eq!(std::format!("{}", Signature([b'X', 0, b'Y', 0xFF])), "X?Y?");
    }
}
