//! Callback registration
//!
//! Tracks which plugin owns each syscall and provider subscription. Only
//! syscalls known to the host can be claimed, and each syscall or provider
//! has at most one owner.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use strace_common::{Error, ProviderId, Result};
use strace_core::CallbackRegistrar;
use tracing::{debug, info};

/// Identifier the host gives a loaded plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(pub u32);

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plugin#{}", self.0)
    }
}

/// An active syscall subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallRegistration {
    pub plugin: PluginId,
    pub probe_id: u64,
}

/// Strip the `Nt`/`Zw` prefix so every spelling of a syscall shares one entry
pub fn normalize_syscall_name(name: &str) -> &str {
    name.strip_prefix("Nt")
        .or_else(|| name.strip_prefix("Zw"))
        .unwrap_or(name)
}

pub struct CallbackRegistry {
    /// Normalized name to service address, fixed at construction
    services: HashMap<String, u64>,
    by_address: HashMap<u64, String>,
    syscalls: RwLock<HashMap<String, SyscallRegistration>>,
    providers: RwLock<HashMap<ProviderId, PluginId>>,
}

impl CallbackRegistry {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let services: HashMap<String, u64> = services
            .into_iter()
            .map(|(name, address)| (normalize_syscall_name(name.as_ref()).to_string(), address))
            .collect();
        let by_address = services
            .iter()
            .map(|(name, address)| (*address, name.clone()))
            .collect();
        Self {
            services,
            by_address,
            syscalls: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Service address of a syscall the host can intercept
    pub fn service_address(&self, name: &str) -> Option<u64> {
        self.services.get(normalize_syscall_name(name)).copied()
    }

    pub fn known_syscalls(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn set_callback(&self, plugin: PluginId, name: &str, probe_id: u64) -> Result<()> {
        let key = normalize_syscall_name(name);
        if !self.services.contains_key(key) {
            return Err(Error::UnknownSyscall(name.to_string()));
        }

        let mut syscalls = self.syscalls.write();
        if let Some(existing) = syscalls.get(key) {
            debug!(%plugin, owner = %existing.plugin, syscall = key, "syscall already claimed");
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        syscalls.insert(key.to_string(), SyscallRegistration { plugin, probe_id });
        info!(%plugin, syscall = key, probe_id, "syscall callback registered");
        Ok(())
    }

    /// Drop `plugin`'s registration of `name`; another plugin's entry is not touched
    pub fn unset_callback(&self, plugin: PluginId, name: &str) -> Result<()> {
        let key = normalize_syscall_name(name);
        let mut syscalls = self.syscalls.write();
        match syscalls.get(key) {
            Some(existing) if existing.plugin == plugin => {
                syscalls.remove(key);
                info!(%plugin, syscall = key, "syscall callback removed");
                Ok(())
            }
            _ => Err(Error::NotRegistered(name.to_string())),
        }
    }

    pub fn set_etw_callback(&self, plugin: PluginId, provider: ProviderId) -> Result<()> {
        let mut providers = self.providers.write();
        if providers.contains_key(&provider) {
            return Err(Error::ProviderAlreadyRegistered(provider));
        }
        providers.insert(provider, plugin);
        info!(%plugin, %provider, "provider callback registered");
        Ok(())
    }

    pub fn unset_etw_callback(&self, plugin: PluginId, provider: ProviderId) -> Result<()> {
        let mut providers = self.providers.write();
        match providers.get(&provider) {
            Some(owner) if *owner == plugin => {
                providers.remove(&provider);
                info!(%plugin, %provider, "provider callback removed");
                Ok(())
            }
            _ => Err(Error::UnknownProvider(provider)),
        }
    }

    pub fn lookup_syscall(&self, name: &str) -> Option<SyscallRegistration> {
        self.syscalls.read().get(normalize_syscall_name(name)).copied()
    }

    /// Registration behind an intercepted service address
    pub fn lookup_service(&self, service: u64) -> Option<SyscallRegistration> {
        let name = self.by_address.get(&service)?;
        self.syscalls.read().get(name).copied()
    }

    pub fn lookup_provider(&self, provider: &ProviderId) -> Option<PluginId> {
        self.providers.read().get(provider).copied()
    }

    /// Syscalls currently owned by `plugin`, sorted
    pub fn syscalls_of(&self, plugin: PluginId) -> Vec<String> {
        let mut names: Vec<String> = self
            .syscalls
            .read()
            .iter()
            .filter(|(_, registration)| registration.plugin == plugin)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove everything `plugin` owns, returning how many entries went
    pub fn retract_plugin(&self, plugin: PluginId) -> usize {
        let mut removed = 0;
        {
            let mut syscalls = self.syscalls.write();
            let before = syscalls.len();
            syscalls.retain(|_, registration| registration.plugin != plugin);
            removed += before - syscalls.len();
        }
        {
            let mut providers = self.providers.write();
            let before = providers.len();
            providers.retain(|_, owner| *owner != plugin);
            removed += before - providers.len();
        }
        if removed > 0 {
            info!(%plugin, removed, "retracted plugin registrations");
        }
        removed
    }
}

/// The registrar capability of one plugin
pub struct PluginRegistrar {
    plugin: PluginId,
    registry: Arc<CallbackRegistry>,
}

impl PluginRegistrar {
    pub fn new(plugin: PluginId, registry: Arc<CallbackRegistry>) -> Self {
        Self { plugin, registry }
    }
}

impl CallbackRegistrar for PluginRegistrar {
    fn set_callback(&self, syscall_name: &str, probe_id: u64) -> Result<()> {
        self.registry.set_callback(self.plugin, syscall_name, probe_id)
    }

    fn unset_callback(&self, syscall_name: &str) -> Result<()> {
        self.registry.unset_callback(self.plugin, syscall_name)
    }

    fn set_etw_callback(&self, provider: ProviderId) -> Result<()> {
        self.registry.set_etw_callback(self.plugin, provider)
    }

    fn unset_etw_callback(&self, provider: ProviderId) -> Result<()> {
        self.registry.unset_etw_callback(self.plugin, provider)
    }
}
