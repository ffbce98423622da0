//! Plugin-scoped thread-local slots
//!
//! The host keeps `MAX_TLS_SLOT` raw slots per thread and shares them between
//! every loaded plugin. Each plugin is handed a [`PluginTls`] covering only
//! the range reserved for it, so plugin-local slot 0 of one plugin never
//! aliases another plugin's slot 0.

use crate::traits::TlsStorage;
use std::sync::Arc;
use strace_common::{Error, Result};

/// Raw slots available per thread
pub const MAX_TLS_SLOT: u8 = 64;

#[derive(Clone)]
pub struct PluginTls {
    storage: Arc<dyn TlsStorage>,
    base: u8,
    count: u8,
}

impl PluginTls {
    /// Handle over raw slots `base..base + count`
    pub fn new(storage: Arc<dyn TlsStorage>, base: u8, count: u8) -> Self {
        Self {
            storage,
            base,
            count,
        }
    }

    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    /// Raw slot behind `slot`; a range reaching past `MAX_TLS_SLOT` is cut there
    fn raw_slot(&self, slot: u8) -> Result<u8> {
        let raw = if slot < self.count {
            self.base.checked_add(slot).filter(|raw| *raw < MAX_TLS_SLOT)
        } else {
            None
        };
        raw.ok_or(Error::TlsSlotOutOfRange {
            slot,
            count: self.count,
        })
    }

    /// Store `value` in plugin-local `slot` for the current thread
    pub fn set(&self, slot: u8, value: u64) -> Result<()> {
        let raw = self.raw_slot(slot)?;
        if self.storage.set(raw, value) {
            Ok(())
        } else {
            Err(Error::TlsUnavailable)
        }
    }

    pub fn get(&self, slot: u8) -> Result<u64> {
        let raw = self.raw_slot(slot)?;
        self.storage.get(raw).ok_or(Error::TlsUnavailable)
    }
}

impl std::fmt::Debug for PluginTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginTls")
            .field("base", &self.base)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FlatSlots {
        slots: Mutex<[Option<u64>; MAX_TLS_SLOT as usize]>,
        available: bool,
    }

    impl FlatSlots {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                slots: Mutex::new([None; MAX_TLS_SLOT as usize]),
                available,
            })
        }
    }

    impl TlsStorage for FlatSlots {
        fn set(&self, slot: u8, value: u64) -> bool {
            if !self.available || slot >= MAX_TLS_SLOT {
                return false;
            }
            self.slots.lock()[slot as usize] = Some(value);
            true
        }

        fn get(&self, slot: u8) -> Option<u64> {
            if !self.available {
                return None;
            }
            self.slots.lock().get(slot as usize).copied().flatten()
        }
    }

    #[test]
    fn test_local_slots_map_into_range() {
        let storage = FlatSlots::new(true);
        let tls = PluginTls::new(storage.clone(), 10, 4);
        tls.set(0, 100).unwrap();
        tls.set(3, 103).unwrap();

        assert_eq!(tls.get(0).unwrap(), 100);
        assert_eq!(storage.get(10), Some(100));
        assert_eq!(storage.get(13), Some(103));
        assert_eq!(storage.get(0), None);
    }

    #[test]
    fn test_two_plugins_do_not_alias() {
        let storage = FlatSlots::new(true);
        let first = PluginTls::new(storage.clone(), 0, 2);
        let second = PluginTls::new(storage.clone(), 2, 2);
        first.set(0, 1).unwrap();
        second.set(0, 2).unwrap();
        assert_eq!(first.get(0).unwrap(), 1);
        assert_eq!(second.get(0).unwrap(), 2);
    }

    #[test]
    fn test_slot_outside_range_is_rejected() {
        let storage = FlatSlots::new(true);
        let tls = PluginTls::new(storage.clone(), 8, 2);
        assert!(matches!(
            tls.set(2, 1),
            Err(Error::TlsSlotOutOfRange { slot: 2, count: 2 })
        ));
        assert!(tls.get(7).is_err());
        assert_eq!(storage.get(10), None);
    }

    #[test]
    fn test_range_past_raw_slots_is_rejected() {
        let storage = FlatSlots::new(true);
        let wrapping = PluginTls::new(storage.clone(), 250, 10);
        assert!(matches!(
            wrapping.set(7, 1),
            Err(Error::TlsSlotOutOfRange { slot: 7, count: 10 })
        ));
        assert!(wrapping.get(9).is_err());

        let straddling = PluginTls::new(storage.clone(), 60, 8);
        straddling.set(3, 63).unwrap();
        assert!(matches!(
            straddling.set(4, 64),
            Err(Error::TlsSlotOutOfRange { slot: 4, count: 8 })
        ));
        assert_eq!(storage.get(63), Some(63));
    }

    #[test]
    fn test_unavailable_storage() {
        let tls = PluginTls::new(FlatSlots::new(false), 0, 1);
        assert!(matches!(tls.set(0, 1), Err(Error::TlsUnavailable)));
        assert!(matches!(tls.get(0), Err(Error::TlsUnavailable)));
    }
}
