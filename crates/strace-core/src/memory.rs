//! Chunked cross-address-space copies
//!
//! The copy walks the buffer in fixed-width chunks so a caller controls how
//! accesses straddle page boundaries. Widths 1, 2, 4 and 8 copy; any other
//! width advances without touching memory. A tail shorter than the chunk
//! width fails the whole call, as does any faulting chunk.

use crate::traits::MemoryTransfer;
use tracing::trace;

/// Chunk widths that actually move data
pub const SUPPORTED_CHUNK_SIZES: [usize; 4] = [1, 2, 4, 8];

/// Memory that may fault on access
pub trait AddressSpace {
    /// Check the whole range is accessible before copying
    fn probe(&self, _address: u64, _len: usize, _write: bool) -> bool {
        true
    }

    /// Copy `dest.len()` bytes from `address`, false on fault
    fn read_chunk(&self, address: u64, dest: &mut [u8]) -> bool;

    /// Copy `src` to `address`, false on fault
    fn write_chunk(&self, address: u64, src: &[u8]) -> bool;
}

/// Walk `transfer` over `space` in `chunk_size` steps
pub fn walk_chunks<S: AddressSpace + ?Sized>(
    space: &S,
    transfer: MemoryTransfer<'_>,
    unsafe_address: u64,
    chunk_size: usize,
) -> bool {
    let total = transfer.len();
    if total == 0 {
        return true;
    }
    if chunk_size == 0 {
        return false;
    }
    if unsafe_address.checked_add(total as u64).is_none() {
        return false;
    }
    if !space.probe(unsafe_address, total, !transfer.is_read()) {
        trace!(unsafe_address, total, "probe failed");
        return false;
    }

    let copies = SUPPORTED_CHUNK_SIZES.contains(&chunk_size);
    let mut offset = 0usize;

    match transfer {
        MemoryTransfer::Read(buf) => {
            while offset < total {
                if total - offset < chunk_size {
                    return false;
                }
                let address = unsafe_address + offset as u64;
                if copies && !space.read_chunk(address, &mut buf[offset..offset + chunk_size]) {
                    trace!(address, chunk_size, "read fault");
                    return false;
                }
                offset += chunk_size;
            }
        }
        MemoryTransfer::Write(buf) => {
            while offset < total {
                if total - offset < chunk_size {
                    return false;
                }
                let address = unsafe_address + offset as u64;
                if copies && !space.write_chunk(address, &buf[offset..offset + chunk_size]) {
                    trace!(address, chunk_size, "write fault");
                    return false;
                }
                offset += chunk_size;
            }
        }
    }

    true
}
