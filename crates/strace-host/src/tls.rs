//! Per-thread probe records and TLS slot reservations
//!
//! A thread gets a record on its first entry probe. Every entry probe raises
//! the record's call depth and every exit probe lowers it; the record and its
//! slots are freed when the depth reaches zero again.

use crate::registry::PluginId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::ThreadId;
use strace_common::{Error, Result};
use strace_core::{TlsStorage, MAX_TLS_SLOT};
use tracing::trace;

struct ThreadRecord {
    depth: u32,
    slots: [u64; MAX_TLS_SLOT as usize],
}

/// Raw TLS of every thread currently inside a probe
#[derive(Default)]
pub struct ThreadTlsStore {
    records: Mutex<HashMap<ThreadId, ThreadRecord>>,
}

impl ThreadTlsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a probe on the current thread, returning the new depth
    pub fn enter(&self) -> u32 {
        let id = std::thread::current().id();
        let mut records = self.records.lock();
        let record = records.entry(id).or_insert_with(|| ThreadRecord {
            depth: 0,
            slots: [0; MAX_TLS_SLOT as usize],
        });
        record.depth += 1;
        trace!(?id, depth = record.depth, "probe entered");
        record.depth
    }

    /// Leave a probe on the current thread, returning the remaining depth
    pub fn exit(&self) -> u32 {
        let id = std::thread::current().id();
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&id) else {
            return 0;
        };
        record.depth = record.depth.saturating_sub(1);
        let depth = record.depth;
        if depth == 0 {
            records.remove(&id);
            trace!(?id, "thread record freed");
        }
        depth
    }

    /// Depth of the current thread, zero outside any probe
    pub fn depth(&self) -> u32 {
        let id = std::thread::current().id();
        self.records.lock().get(&id).map_or(0, |r| r.depth)
    }

    /// Threads currently holding a record
    pub fn active_threads(&self) -> usize {
        self.records.lock().len()
    }
}

impl TlsStorage for ThreadTlsStore {
    fn set(&self, slot: u8, value: u64) -> bool {
        if slot >= MAX_TLS_SLOT {
            return false;
        }
        let id = std::thread::current().id();
        match self.records.lock().get_mut(&id) {
            Some(record) => {
                record.slots[slot as usize] = value;
                true
            }
            None => false,
        }
    }

    fn get(&self, slot: u8) -> Option<u64> {
        if slot >= MAX_TLS_SLOT {
            return None;
        }
        let id = std::thread::current().id();
        self.records
            .lock()
            .get(&id)
            .map(|record| record.slots[slot as usize])
    }
}

/// Hands out disjoint slot ranges to plugins
pub struct SlotAllocator {
    capacity: u8,
    ranges: Mutex<Vec<(PluginId, u8, u8)>>,
}

impl SlotAllocator {
    pub fn new(capacity: u8) -> Self {
        Self {
            capacity: capacity.min(MAX_TLS_SLOT),
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// Reserve `count` contiguous slots for `plugin`, first fit
    pub fn reserve(&self, plugin: PluginId, count: u8) -> Result<u8> {
        if count == 0 {
            return Ok(0);
        }
        let mut ranges = self.ranges.lock();
        ranges.sort_by_key(|&(_, base, _)| base);

        let mut cursor = 0u8;
        for &(_, base, len) in ranges.iter() {
            if base - cursor >= count {
                break;
            }
            cursor = base + len;
        }
        if self.capacity - cursor < count {
            let used: u8 = ranges.iter().map(|&(_, _, len)| len).sum();
            return Err(Error::TlsExhausted {
                requested: count,
                available: self.capacity - used,
            });
        }
        ranges.push((plugin, cursor, count));
        trace!(%plugin, base = cursor, count, "tls range reserved");
        Ok(cursor)
    }

    pub fn release(&self, plugin: PluginId) {
        self.ranges.lock().retain(|&(owner, _, _)| owner != plugin);
    }

    pub fn available(&self) -> u8 {
        let used: u8 = self.ranges.lock().iter().map(|&(_, _, len)| len).sum();
        self.capacity - used
    }
}
