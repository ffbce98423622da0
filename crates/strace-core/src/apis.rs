//! The capability table handed to a plugin at initialization

use crate::tls::PluginTls;
use crate::traits::{
    CallbackRegistrar, EventSink, LogSink, MemoryAccess, MemoryTransfer, SymbolResolver,
};
use std::fmt;
use std::sync::Arc;
use strace_common::{LogLevel, ProviderId, Result, TraceEvent};

/// Everything a plugin may ask of its host
///
/// Built once by the host before `Plugin::initialize` and never changed
/// afterwards. Cloning is cheap; plugins usually keep a clone for their
/// handlers.
#[derive(Clone)]
pub struct PluginApis {
    tls: PluginTls,
    logger: Arc<dyn LogSink>,
    events: Arc<dyn EventSink>,
    registrar: Arc<dyn CallbackRegistrar>,
    symbols: Arc<dyn SymbolResolver>,
    memory: Arc<dyn MemoryAccess>,
}

impl PluginApis {
    pub fn new(
        tls: PluginTls,
        logger: Arc<dyn LogSink>,
        events: Arc<dyn EventSink>,
        registrar: Arc<dyn CallbackRegistrar>,
        symbols: Arc<dyn SymbolResolver>,
        memory: Arc<dyn MemoryAccess>,
    ) -> Self {
        Self {
            tls,
            logger,
            events,
            registrar,
            symbols,
            memory,
        }
    }

    pub fn tls(&self) -> &PluginTls {
        &self.tls
    }

    pub fn set_tls_data(&self, slot: u8, value: u64) -> Result<()> {
        self.tls.set(slot, value)
    }

    pub fn get_tls_data(&self, slot: u8) -> Result<u64> {
        self.tls.get(slot)
    }

    pub fn log_print(&self, level: LogLevel, origin: &str, message: fmt::Arguments<'_>) -> Result<()> {
        self.logger.log_print(level, origin, message)
    }

    pub fn trace_event(&self, event: &TraceEvent) -> Result<()> {
        self.events.trace_event(event)
    }

    pub fn set_callback(&self, syscall_name: &str, probe_id: u64) -> Result<()> {
        self.registrar.set_callback(syscall_name, probe_id)
    }

    pub fn unset_callback(&self, syscall_name: &str) -> Result<()> {
        self.registrar.unset_callback(syscall_name)
    }

    pub fn set_etw_callback(&self, provider: ProviderId) -> Result<()> {
        self.registrar.set_etw_callback(provider)
    }

    pub fn unset_etw_callback(&self, provider: ProviderId) -> Result<()> {
        self.registrar.unset_etw_callback(provider)
    }

    pub fn get_system_routine_address(&self, name: &[u16]) -> Option<u64> {
        self.symbols.get_system_routine_address(name)
    }

    /// Resolve a kernel routine by its UTF-8 name
    pub fn resolve_api(&self, name: &str) -> Option<u64> {
        let wide: Vec<u16> = name.encode_utf16().collect();
        self.symbols.get_system_routine_address(&wide)
    }

    pub fn access_memory(
        &self,
        transfer: MemoryTransfer<'_>,
        unsafe_address: u64,
        chunk_size: usize,
    ) -> bool {
        self.memory.access_memory(transfer, unsafe_address, chunk_size)
    }

    /// Byte-wise read of `len` bytes at `address`
    pub fn read_bytes(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.memory
            .access_memory(MemoryTransfer::Read(&mut buf), address, 1)
            .then_some(buf)
    }

    pub fn read_u64(&self, address: u64) -> Option<u64> {
        let mut buf = [0u8; 8];
        self.memory
            .access_memory(MemoryTransfer::Read(&mut buf), address, 8)
            .then(|| u64::from_le_bytes(buf))
    }

    /// Read a UTF-16 string of `chars` code units
    pub fn read_wide_string(&self, address: u64, chars: usize) -> Option<String> {
        let bytes = self.read_bytes(address, chars.checked_mul(2)?)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).ok()
    }
}

impl fmt::Debug for PluginApis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApis").field("tls", &self.tls).finish_non_exhaustive()
    }
}

/// Log through a capability table with `format!` syntax
///
/// ```ignore
/// log_print!(apis, LogLevel::Info, "OpenFile", "handle {:#x}", handle);
/// ```
#[macro_export]
macro_rules! log_print {
    ($apis:expr, $level:expr, $origin:expr, $($arg:tt)+) => {
        $apis.log_print($level, $origin, format_args!($($arg)+))
    };
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory capabilities for unit tests

    use super::*;
    use crate::memory::{walk_chunks, AddressSpace};
    use crate::tls::MAX_TLS_SLOT;
    use crate::traits::TlsStorage;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use strace_common::Error;

    #[derive(Default)]
    pub struct Recorder {
        pub logs: Mutex<Vec<(LogLevel, String, String)>>,
        pub events: Mutex<Vec<TraceEvent>>,
        pub syscalls: Mutex<HashMap<String, u64>>,
        pub providers: Mutex<Vec<ProviderId>>,
        pub slots: Mutex<HashMap<u8, u64>>,
        pub routines: HashMap<String, u64>,
        pub memory: Vec<u8>,
    }

    impl TlsStorage for Recorder {
        fn set(&self, slot: u8, value: u64) -> bool {
            if slot >= MAX_TLS_SLOT {
                return false;
            }
            self.slots.lock().insert(slot, value);
            true
        }

        fn get(&self, slot: u8) -> Option<u64> {
            self.slots.lock().get(&slot).copied()
        }
    }

    impl LogSink for Recorder {
        fn log_print(&self, level: LogLevel, origin: &str, message: fmt::Arguments<'_>) -> Result<()> {
            self.logs
                .lock()
                .push((level, origin.to_string(), message.to_string()));
            Ok(())
        }
    }

    impl EventSink for Recorder {
        fn trace_event(&self, event: &TraceEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    impl CallbackRegistrar for Recorder {
        fn set_callback(&self, syscall_name: &str, probe_id: u64) -> Result<()> {
            let mut syscalls = self.syscalls.lock();
            if syscalls.contains_key(syscall_name) {
                return Err(Error::AlreadyRegistered(syscall_name.to_string()));
            }
            syscalls.insert(syscall_name.to_string(), probe_id);
            Ok(())
        }

        fn unset_callback(&self, syscall_name: &str) -> Result<()> {
            self.syscalls
                .lock()
                .remove(syscall_name)
                .map(|_| ())
                .ok_or_else(|| Error::NotRegistered(syscall_name.to_string()))
        }

        fn set_etw_callback(&self, provider: ProviderId) -> Result<()> {
            self.providers.lock().push(provider);
            Ok(())
        }

        fn unset_etw_callback(&self, provider: ProviderId) -> Result<()> {
            let mut providers = self.providers.lock();
            let before = providers.len();
            providers.retain(|p| *p != provider);
            if providers.len() == before {
                return Err(Error::UnknownProvider(provider));
            }
            Ok(())
        }
    }

    impl SymbolResolver for Recorder {
        fn get_system_routine_address(&self, name: &[u16]) -> Option<u64> {
            let name = String::from_utf16(name).ok()?;
            self.routines.get(&name).copied()
        }
    }

    /// `memory` is mapped at 0x1000
    impl AddressSpace for Recorder {
        fn read_chunk(&self, address: u64, dest: &mut [u8]) -> bool {
            let Some(start) = address.checked_sub(0x1000).map(|s| s as usize) else {
                return false;
            };
            match self.memory.get(start..start + dest.len()) {
                Some(src) => {
                    dest.copy_from_slice(src);
                    true
                }
                None => false,
            }
        }

        fn write_chunk(&self, _address: u64, _src: &[u8]) -> bool {
            false
        }
    }

    impl MemoryAccess for Recorder {
        fn access_memory(
            &self,
            transfer: MemoryTransfer<'_>,
            unsafe_address: u64,
            chunk_size: usize,
        ) -> bool {
            walk_chunks(self, transfer, unsafe_address, chunk_size)
        }
    }

    pub fn apis(recorder: &Arc<Recorder>, tls_base: u8, tls_count: u8) -> PluginApis {
        PluginApis::new(
            PluginTls::new(recorder.clone(), tls_base, tls_count),
            recorder.clone(),
            recorder.clone(),
            recorder.clone(),
            recorder.clone(),
            recorder.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{apis, Recorder};
    use super::*;
    use std::collections::HashMap;
    use strace_common::{Error, FieldType};

    fn recorder() -> Arc<Recorder> {
        let mut routines = HashMap::new();
        routines.insert("PsGetProcessPeb".to_string(), 0xFFFF_F800_0010_0000);
        let mut memory = vec![0u8; 32];
        memory[..8].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        for (i, unit) in "hi".encode_utf16().enumerate() {
            memory[8 + i * 2..10 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        Arc::new(Recorder {
            routines,
            memory,
            ..Default::default()
        })
    }

    #[test]
    fn test_log_print_macro() {
        let rec = recorder();
        let apis = apis(&rec, 0, 0);
        crate::log_print!(apis, LogLevel::Warn, "OpenFile", "handle {:#x}", 0x44).unwrap();
        let logs = rec.logs.lock();
        assert_eq!(
            logs[0],
            (LogLevel::Warn, "OpenFile".to_string(), "handle 0x44".to_string())
        );
    }

    #[test]
    fn test_trace_event_forwarded() {
        let rec = recorder();
        let apis = apis(&rec, 0, 0);
        let provider = ProviderId::from_fields(1, 2, 3, [0; 8]);
        let event = TraceEvent::new("STrace", provider, "E").field("pid", FieldType::PID, 9u32);
        apis.trace_event(&event).unwrap();
        assert_eq!(rec.events.lock()[0], event);
    }

    #[test]
    fn test_registration_status_passthrough() {
        let rec = recorder();
        let apis = apis(&rec, 0, 0);
        apis.set_callback("OpenFile", 1).unwrap();
        let err = apis.set_callback("OpenFile", 2).unwrap_err();
        assert!(!err.status().is_success());
        assert_eq!(rec.syscalls.lock()["OpenFile"], 1);
        assert!(matches!(
            apis.unset_callback("CreateFile"),
            Err(Error::NotRegistered(_))
        ));
    }

    #[test]
    fn test_resolve_api_converts_to_wide() {
        let rec = recorder();
        let apis = apis(&rec, 0, 0);
        assert_eq!(apis.resolve_api("PsGetProcessPeb"), Some(0xFFFF_F800_0010_0000));
        assert_eq!(apis.resolve_api("Missing"), None);
    }

    #[test]
    fn test_memory_helpers() {
        let rec = recorder();
        let apis = apis(&rec, 0, 0);
        assert_eq!(apis.read_u64(0x1000), Some(0x1122_3344_5566_7788));
        assert_eq!(apis.read_bytes(0x1000, 2), Some(vec![0x88, 0x77]));
        assert_eq!(apis.read_wide_string(0x1008, 2).as_deref(), Some("hi"));
        assert_eq!(apis.read_u64(0x2000), None);
    }

    #[test]
    fn test_tls_goes_through_plugin_range() {
        let rec = recorder();
        let apis = apis(&rec, 16, 2);
        apis.set_tls_data(1, 77).unwrap();
        assert_eq!(apis.get_tls_data(1).unwrap(), 77);
        assert_eq!(rec.slots.lock().get(&17), Some(&77));
        assert!(apis.set_tls_data(2, 1).is_err());
    }
}
