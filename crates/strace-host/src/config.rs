//! Host configuration
//!
//! Loaded from TOML. Every table is optional:
//!
//! ```toml
//! [logging]
//! level = "debug"
//! plugin_level = "warn"
//!
//! [arguments]
//! bound = "legacy"
//! convention = "x64"
//!
//! [events]
//! max_events = 4096
//! backpressure = { sample = { rate = 10 } }
//!
//! [syscalls]
//! NtOpenFile = "0xFFFFF80000401000"
//! NtClose = 0x401000
//!
//! [routines]
//! PsGetProcessPeb = "0xFFFFF80000102000"
//! ```
//!
//! TOML integers are signed, so addresses above `i64::MAX` are written as
//! hex strings. Plain integers are accepted too.

use serde::{Deserialize, Serialize};
use crate::registry::normalize_syscall_name;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use strace_common::{Error, LogConfig, Result};
use strace_core::{ArgumentBound, CallingConvention, MAX_TLS_SLOT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub arguments: ArgumentConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub events: RingBufferConfig,
    /// Syscall name to the address of its service routine
    #[serde(default, with = "address_map")]
    pub syscalls: BTreeMap<String, u64>,
    /// Kernel routine name to address, served to plugins by name lookup
    #[serde(default, with = "address_map")]
    pub routines: BTreeMap<String, u64>,
}

/// How intercepted calls are presented to plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentConfig {
    #[serde(default)]
    pub bound: ArgumentBound,
    #[serde(default = "default_convention")]
    pub convention: CallingConvention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Raw slots shared between all plugins, at most 64
    #[serde(default = "default_tls_slots")]
    pub slots: u8,
}

/// What to do when the event ring is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategy {
    /// Evict the oldest event
    #[default]
    DropOldest,
    /// Refuse the new event and report failure to the plugin
    Reject,
    /// Keep one in `rate` events while full
    Sample { rate: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBufferConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default)]
    pub backpressure: BackpressureStrategy,
}

fn default_convention() -> CallingConvention {
    CallingConvention::X64
}

fn default_tls_slots() -> u8 {
    MAX_TLS_SLOT
}

fn default_max_events() -> usize {
    10000
}

mod address_map {
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAddress {
        Int(u64),
        Text(String),
    }

    pub fn parse_address(text: &str) -> Option<u64> {
        let text = text.trim().replace('_', "");
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        }
    }

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, u64>, s: S) -> Result<S::Ok, S::Error> {
        let mut out = s.serialize_map(Some(map.len()))?;
        for (name, address) in map {
            out.serialize_entry(name, &format!("{:#x}", address))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, u64>, D::Error> {
        let raw = BTreeMap::<String, RawAddress>::deserialize(d)?;
        raw.into_iter()
            .map(|(name, address)| match address {
                RawAddress::Int(value) => Ok((name, value)),
                RawAddress::Text(text) => parse_address(&text)
                    .map(|value| (name, value))
                    .ok_or_else(|| D::Error::custom(format!("invalid address '{}'", text))),
            })
            .collect()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            logging: LogConfig::default(),
            arguments: ArgumentConfig::default(),
            tls: TlsConfig::default(),
            events: RingBufferConfig::default(),
            syscalls: BTreeMap::new(),
            routines: BTreeMap::new(),
        }
    }
}

impl Default for ArgumentConfig {
    fn default() -> Self {
        Self {
            bound: ArgumentBound::default(),
            convention: default_convention(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            slots: default_tls_slots(),
        }
    }
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            backpressure: BackpressureStrategy::DropOldest,
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tls.slots > MAX_TLS_SLOT {
            return Err(Error::Config(format!(
                "tls.slots is {}, at most {} are available",
                self.tls.slots, MAX_TLS_SLOT
            )));
        }
        if self.events.max_events == 0 {
            return Err(Error::Config("events.max_events must be positive".into()));
        }
        if let BackpressureStrategy::Sample { rate: 0 } = self.events.backpressure {
            return Err(Error::Config("events sample rate must be positive".into()));
        }
        self.validate_syscalls()
    }

    /// Each service address and each normalized name must belong to one syscall
    fn validate_syscalls(&self) -> Result<()> {
        let mut by_address: HashMap<u64, &str> = HashMap::new();
        let mut by_name: HashMap<&str, &str> = HashMap::new();
        for (name, address) in &self.syscalls {
            if let Some(other) = by_address.insert(*address, name) {
                return Err(Error::Config(format!(
                    "syscalls {} and {} share service address {:#x}",
                    other, name, address
                )));
            }
            if let Some(other) = by_name.insert(normalize_syscall_name(name), name) {
                return Err(Error::Config(format!(
                    "syscalls {} and {} name the same service",
                    other, name
                )));
            }
        }
        Ok(())
    }

    /// Install the global subscriber described by `[logging]`
    pub fn init_logging(&self) -> Result<()> {
        strace_common::init_logging(&self.logging)
    }

    pub fn with_syscall(mut self, name: impl Into<String>, service: u64) -> Self {
        self.syscalls.insert(name.into(), service);
        self
    }

    pub fn with_routine(mut self, name: impl Into<String>, address: u64) -> Self {
        self.routines.insert(name.into(), address);
        self
    }
}
