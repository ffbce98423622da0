//! Capability traits a host injects into plugins
//!
//! Each trait is one entry of the capability table. Hosts implement them
//! over their real facilities; tests implement them over fakes. All of them
//! may be called concurrently from any intercepted thread.

use std::fmt;
use strace_common::{LogLevel, ProviderId, Result, TraceEvent};

/// Per-thread scratch slots, keyed by raw slot id
///
/// Plugins reach this only through [`crate::PluginTls`], which confines
/// them to the slot range the host reserved for them.
pub trait TlsStorage: Send + Sync {
    /// Store a value for the current thread, false when no TLS record exists
    fn set(&self, slot: u8, value: u64) -> bool;

    /// Load a value for the current thread
    fn get(&self, slot: u8) -> Option<u64>;
}

/// Host log output
pub trait LogSink: Send + Sync {
    fn log_print(&self, level: LogLevel, origin: &str, message: fmt::Arguments<'_>) -> Result<()>;
}

/// Structured event emission
pub trait EventSink: Send + Sync {
    fn trace_event(&self, event: &TraceEvent) -> Result<()>;
}

/// Subscription management for the calling plugin
pub trait CallbackRegistrar: Send + Sync {
    /// Route `syscall_name` to this plugin, handing `probe_id` back on every hit
    fn set_callback(&self, syscall_name: &str, probe_id: u64) -> Result<()>;

    fn unset_callback(&self, syscall_name: &str) -> Result<()>;

    /// Route every event of `provider` to this plugin
    fn set_etw_callback(&self, provider: ProviderId) -> Result<()>;

    fn unset_etw_callback(&self, provider: ProviderId) -> Result<()>;
}

/// Kernel routine lookup, `MmGetSystemRoutineAddress` style
pub trait SymbolResolver: Send + Sync {
    /// Resolve a UTF-16 routine name to its address
    fn get_system_routine_address(&self, name: &[u16]) -> Option<u64>;
}

/// Direction and safe-side buffer of a cross-address-space copy
#[derive(Debug)]
pub enum MemoryTransfer<'a> {
    /// Copy from the unsafe address into this buffer
    Read(&'a mut [u8]),
    /// Copy this buffer to the unsafe address
    Write(&'a [u8]),
}

impl MemoryTransfer<'_> {
    pub fn len(&self) -> usize {
        match self {
            MemoryTransfer::Read(buf) => buf.len(),
            MemoryTransfer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read(&self) -> bool {
        matches!(self, MemoryTransfer::Read(_))
    }
}

/// Fault-tolerant access to memory that may be paged out or invalid
pub trait MemoryAccess: Send + Sync {
    /// Copy `transfer.len()` bytes `chunk_size` bytes at a time
    ///
    /// Returns false on any fault or when the length is not a multiple of
    /// the chunk size. See [`crate::memory::walk_chunks`] for the exact walk.
    fn access_memory(&self, transfer: MemoryTransfer<'_>, unsafe_address: u64, chunk_size: usize)
        -> bool;
}
