//! Simulated address space for the memory capability
//!
//! Regions are mapped explicitly; anything else faults. Reads and writes go
//! through [`walk_chunks`] exactly as a kernel host's guarded copy would.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use strace_common::{Error, Result};
use strace_core::{walk_chunks, AddressSpace, MemoryAccess, MemoryTransfer};
use tracing::debug;

#[derive(Debug)]
struct Region {
    bytes: Vec<u8>,
    writable: bool,
}

impl Region {
    fn end(&self, base: u64) -> u64 {
        base + self.bytes.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct SimulatedMemory {
    regions: RwLock<BTreeMap<u64, Region>>,
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `base`; overlapping an existing region is an error
    pub fn map(&self, base: u64, bytes: Vec<u8>, writable: bool) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::Internal("cannot map an empty region".into()));
        }
        let end = base
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| Error::Internal(format!("region at {:#x} wraps", base)))?;

        let mut regions = self.regions.write();
        let overlaps = regions
            .range(..end)
            .next_back()
            .is_some_and(|(&start, region)| region.end(start) > base);
        if overlaps {
            return Err(Error::Internal(format!(
                "region {:#x}..{:#x} overlaps an existing mapping",
                base, end
            )));
        }
        debug!(base, len = bytes.len(), writable, "region mapped");
        regions.insert(base, Region { bytes, writable });
        Ok(())
    }

    /// Unmap the region starting at `base`, returning its contents
    pub fn unmap(&self, base: u64) -> Option<Vec<u8>> {
        self.regions.write().remove(&base).map(|region| region.bytes)
    }

    pub fn is_mapped(&self, address: u64, len: usize) -> bool {
        self.with_range(address, len, |_, _| ()).is_some()
    }

    /// Run `f` on the bytes of `address..address + len` within one region
    fn with_range<T>(&self, address: u64, len: usize, f: impl FnOnce(&[u8], bool) -> T) -> Option<T> {
        let regions = self.regions.read();
        let (&base, region) = regions.range(..=address).next_back()?;
        let start = (address - base) as usize;
        let end = start.checked_add(len)?;
        region.bytes.get(start..end).map(|bytes| f(bytes, region.writable))
    }

    fn with_range_mut<T>(&self, address: u64, len: usize, f: impl FnOnce(&mut [u8]) -> T) -> Option<T> {
        let mut regions = self.regions.write();
        let (&base, region) = regions.range_mut(..=address).next_back()?;
        if !region.writable {
            return None;
        }
        let start = (address - base) as usize;
        let end = start.checked_add(len)?;
        region.bytes.get_mut(start..end).map(f)
    }
}

impl AddressSpace for SimulatedMemory {
    fn probe(&self, address: u64, len: usize, write: bool) -> bool {
        self.with_range(address, len, |_, writable| writable || !write)
            .unwrap_or(false)
    }

    fn read_chunk(&self, address: u64, dest: &mut [u8]) -> bool {
        self.with_range(address, dest.len(), |src, _| dest.copy_from_slice(src))
            .is_some()
    }

    fn write_chunk(&self, address: u64, src: &[u8]) -> bool {
        self.with_range_mut(address, src.len(), |dest| dest.copy_from_slice(src))
            .is_some()
    }
}

impl MemoryAccess for SimulatedMemory {
    fn access_memory(&self, transfer: MemoryTransfer<'_>, unsafe_address: u64, chunk_size: usize) -> bool {
        walk_chunks(self, transfer, unsafe_address, chunk_size)
    }
}
