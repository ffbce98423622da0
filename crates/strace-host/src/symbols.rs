//! Static kernel symbol table

use std::collections::HashMap;
use strace_core::SymbolResolver;
use tracing::trace;

/// Routine names and addresses the host exports to plugins
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    routines: HashMap<String, u64>,
}

impl SymbolTable {
    pub fn new<I, S>(routines: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            routines: routines
                .into_iter()
                .map(|(name, address)| (name.into(), address))
                .collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, address: u64) {
        self.routines.insert(name.into(), address);
    }

    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.routines.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

impl SymbolResolver for SymbolTable {
    fn get_system_routine_address(&self, name: &[u16]) -> Option<u64> {
        // callers may pass a NUL-terminated buffer
        let end = name.iter().position(|&c| c == 0).unwrap_or(name.len());
        let name = String::from_utf16(&name[..end]).ok()?;
        let address = self.resolve(&name);
        trace!(routine = %name, found = address.is_some(), "routine lookup");
        address
    }
}
