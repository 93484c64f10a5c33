use super::{phys_addr, util, AcpiError};

use amd64::mem::{PhysMemory, ReadLe};
use amd64::PhysAddr;

/// Root System Description Pointer.
#[derive(Debug, Clone, Copy)]
pub struct Rsdp {
    addr: PhysAddr,
    revision: u8,
    oem_id: [u8; 6],
    rsdt_address: u32,
    xsdt_address: Option<u64>,
}

impl Rsdp {
    pub const SIGNATURE: &'static [u8; 8] = b"RSD PTR ";

    /// Size of the ACPI 1.0 structure covered by the first checksum.
    const V1_SIZE: usize = 20;
    /// Size of the ACPI 2.0 structure.
    const V2_SIZE: usize = 36;

    /// Decode the RSDP at `addr`, validating signature and checksum.
    ///
    /// For revision 2 and later the extended checksum is validated as well; if
    /// it does not match only the 1.0 part is used.
    pub fn parse<M: PhysMemory>(mem: &M, addr: PhysAddr) -> Result<Rsdp, AcpiError> {
        let v1 = mem.slice(addr, Self::V1_SIZE).ok_or(AcpiError::Unreadable(addr.0))?;
        if &v1[0..8] != Self::SIGNATURE {
            return Err(AcpiError::InvalidSignature(addr.0));
        }
        if util::acpi_checksum(v1) != 0 {
            return Err(AcpiError::InvalidChecksum(addr.0));
        }

        let mut oem_id = [0u8; 6];
        oem_id.copy_from_slice(&v1[9..15]);
        let revision = v1[15];
        let rsdt_address = v1.read_u32(16).ok_or(AcpiError::Unreadable(addr.0))?;

        let xsdt_address = if revision >= 2 { Self::parse_v2(mem, addr) } else { None };

        Ok(Rsdp { addr, revision, oem_id, rsdt_address, xsdt_address })
    }

    fn parse_v2<M: PhysMemory>(mem: &M, addr: PhysAddr) -> Option<u64> {
        let v2 = mem.slice(addr, Self::V2_SIZE)?;
        let length = (v2.read_u32(20)? as usize).max(Self::V2_SIZE);
        let full = mem.slice(addr, length)?;
        if util::acpi_checksum(full) != 0 {
            warn!("ACPI: RSDP extended checksum mismatch, using RSDT");
            return None;
        }
        v2.read_u64(24).filter(|&xsdt| xsdt != 0)
    }

    pub fn address(&self) -> PhysAddr {
        self.addr
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn oem_id(&self) -> &[u8] {
        &self.oem_id
    }

    pub fn rsdt_address(&self) -> PhysAddr {
        PhysAddr(self.rsdt_address as usize)
    }

    /// The XSDT address, present for a valid ACPI 2.0+ RSDP.
    pub fn xsdt_address(&self) -> Option<Result<PhysAddr, AcpiError>> {
        self.xsdt_address.map(phys_addr)
    }
}
