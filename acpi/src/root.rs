use super::{phys_addr, AcpiError, Rsdp, Sdt, Signature};

use amd64::mem::{PhysMemory, ReadLe};
use amd64::PhysAddr;

/// The root table listing all other system description tables.
/// Either an RSDT (32 bit pointers) or an XSDT (64 bit pointers).
#[derive(Debug, Clone, Copy)]
pub struct RootTable<'a> {
    table: Sdt<'a>,
    entry_size: usize,
}

impl<'a> RootTable<'a> {
    pub const RSDT_SIGNATURE: Signature = Signature(*b"RSDT");
    pub const XSDT_SIGNATURE: Signature = Signature(*b"XSDT");

    /// Load the root table referenced by `rsdp`, preferring the XSDT when one is available.
    pub fn from_rsdp<M: PhysMemory>(mem: &'a M, rsdp: &Rsdp) -> Result<RootTable<'a>, AcpiError> {
        if let Some(xsdt) = rsdp.xsdt_address() {
            match xsdt.and_then(|addr| Self::load(mem, addr)) {
                Ok(root) => return Ok(root),
                Err(err) => warn!("ACPI: unusable XSDT ({}), falling back to RSDT", err),
            }
        }
        Self::load(mem, rsdp.rsdt_address())
    }

    /// Load an RSDT or XSDT at `addr`.
    pub fn load<M: PhysMemory>(mem: &'a M, addr: PhysAddr) -> Result<RootTable<'a>, AcpiError> {
        let table = Sdt::load(mem, addr)?;
        let entry_size = match table.signature() {
            Self::RSDT_SIGNATURE => 4,
            Self::XSDT_SIGNATURE => 8,
            _ => return Err(AcpiError::InvalidSignature(addr.0)),
        };
        Ok(RootTable { table, entry_size })
    }

    pub fn is_extended(&self) -> bool {
        self.entry_size == 8
    }

    pub fn table(&self) -> &Sdt<'a> {
        &self.table
    }

    /// Physical addresses of all child tables, in table order.
    pub fn entries(&self) -> impl Iterator<Item = u64> + 'a {
        let entry_size = self.entry_size;
        self.table.body().chunks_exact(entry_size).filter_map(move |raw| {
            if entry_size == 8 {
                raw.read_u64(0)
            } else {
                raw.read_u32(0).map(u64::from)
            }
        })
    }

    /// Find the first child table with the given signature and a valid checksum.
    pub fn child<M: PhysMemory>(&self, mem: &'a M, signature: Signature) -> Result<Sdt<'a>, AcpiError> {
        for raw in self.entries() {
            let table = match phys_addr(raw).and_then(|addr| Sdt::load(mem, addr)) {
                Ok(table) => table,
                Err(err) => {
                    warn!("ACPI: skipping child table: {}", err);
                    continue;
                }
            };
            if table.signature() == signature {
                return Ok(table);
            }
        }
        Err(AcpiError::TableNotFound(signature))
    }
}
