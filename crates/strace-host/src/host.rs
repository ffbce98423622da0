//! Plugin loading and probe dispatch

use crate::config::HostConfig;
use crate::frame::SyscallFrame;
use crate::logger::HostLogger;
use crate::memory::SimulatedMemory;
use crate::recorder::EventRecorder;
use crate::registry::{CallbackRegistry, PluginId, PluginRegistrar, SyscallRegistration};
use crate::symbols::SymbolTable;
use crate::tls::{SlotAllocator, ThreadTlsStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use strace_common::{Error, EventHeader, Result};
use strace_core::{ArgumentBound, ArgumentView, CallerInfo, Plugin, PluginApis, PluginTls};
use tracing::{debug, error, info, trace, warn};

struct LoadedPlugin {
    name: String,
    plugin: Box<dyn Plugin>,
}

/// What happened to one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(PluginId),
    /// The handler panicked; the call continues unmodified
    Faulted(PluginId),
    /// The owning plugin does not target the calling process
    Filtered(PluginId),
    /// Raised from inside another probe on the same thread
    Recursive,
    Unregistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivery: Delivery,
    /// Address execution continues at
    pub continuation: u64,
}

impl DispatchOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self.delivery, Delivery::Delivered(_))
    }
}

/// Hosts plugins and routes intercepted calls and provider events to them
pub struct PluginHost {
    config: HostConfig,
    registry: Arc<CallbackRegistry>,
    tls: Arc<ThreadTlsStore>,
    slots: SlotAllocator,
    recorder: Arc<EventRecorder>,
    symbols: Arc<SymbolTable>,
    memory: Arc<SimulatedMemory>,
    plugins: RwLock<HashMap<PluginId, Arc<LoadedPlugin>>>,
    next_id: AtomicU32,
}

impl PluginHost {
    pub fn new(config: HostConfig) -> Result<Self> {
        config.validate()?;
        info!(
            syscalls = config.syscalls.len(),
            routines = config.routines.len(),
            tls_slots = config.tls.slots,
            "plugin host created"
        );
        Ok(Self {
            registry: Arc::new(CallbackRegistry::new(config.syscalls.clone())),
            tls: Arc::new(ThreadTlsStore::new()),
            slots: SlotAllocator::new(config.tls.slots),
            recorder: Arc::new(EventRecorder::new(config.events.clone())),
            symbols: Arc::new(SymbolTable::new(config.routines.clone())),
            memory: Arc::new(SimulatedMemory::new()),
            plugins: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            config,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn memory(&self) -> &SimulatedMemory {
        &self.memory
    }

    pub fn tls_store(&self) -> &ThreadTlsStore {
        &self.tls
    }

    /// Load `plugin` and run its initialization
    ///
    /// On failure every registration the plugin made is retracted and its
    /// TLS range released.
    pub fn load(&self, mut plugin: Box<dyn Plugin>) -> Result<PluginId> {
        let id = PluginId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = plugin.name().to_string();
        let tls_count = plugin.tls_slots();
        let tls_base = self.slots.reserve(id, tls_count)?;

        let apis = PluginApis::new(
            PluginTls::new(self.tls.clone(), tls_base, tls_count),
            Arc::new(HostLogger::new(name.as_str())),
            self.recorder.clone(),
            Arc::new(PluginRegistrar::new(id, self.registry.clone())),
            self.symbols.clone(),
            self.memory.clone(),
        );

        let result = catch_unwind(AssertUnwindSafe(|| plugin.initialize(&apis)))
            .unwrap_or_else(|_| Err(Error::Internal("initialize panicked".into())));
        if let Err(e) = result {
            let retracted = self.registry.retract_plugin(id);
            self.slots.release(id);
            warn!(plugin = %name, %id, error = %e, retracted, "plugin initialization failed");
            return Err(Error::Initialization(format!("{}: {}", name, e)));
        }

        info!(plugin = %name, %id, tls_base, tls_count, "plugin loaded");
        self.plugins
            .write()
            .insert(id, Arc::new(LoadedPlugin { name, plugin }));
        Ok(id)
    }

    /// Deinitialize a plugin, then retract its registrations and TLS range
    pub fn unload(&self, id: PluginId) -> Result<()> {
        let loaded = self
            .plugins
            .write()
            .remove(&id)
            .ok_or(Error::PluginNotFound(id.0))?;

        if catch_unwind(AssertUnwindSafe(|| loaded.plugin.deinitialize())).is_err() {
            error!(plugin = %loaded.name, %id, "deinitialize panicked");
        }
        let retracted = self.registry.retract_plugin(id);
        self.slots.release(id);
        info!(plugin = %loaded.name, %id, retracted, "plugin unloaded");
        Ok(())
    }

    /// Unload every plugin
    pub fn shutdown(&self) {
        let ids: Vec<PluginId> = self.plugins.read().keys().copied().collect();
        for id in ids {
            // a concurrent unload may have won
            let _ = self.unload(id);
        }
    }

    pub fn loaded_plugins(&self) -> Vec<(PluginId, String)> {
        let mut loaded: Vec<_> = self
            .plugins
            .read()
            .iter()
            .map(|(id, p)| (*id, p.name.clone()))
            .collect();
        loaded.sort();
        loaded
    }

    /// Capture a call to the named syscall with `args`
    pub fn frame(&self, syscall_name: &str, args: &[u64]) -> Result<SyscallFrame> {
        let service = self
            .registry
            .service_address(syscall_name)
            .ok_or_else(|| Error::UnknownSyscall(syscall_name.to_string()))?;
        Ok(SyscallFrame::new(service, self.config.arguments.convention, args))
    }

    fn plugin(&self, id: PluginId) -> Option<Arc<LoadedPlugin>> {
        self.plugins.read().get(&id).cloned()
    }

    fn target(&self, service: u64) -> Option<(SyscallRegistration, Arc<LoadedPlugin>)> {
        let registration = self.registry.lookup_service(service)?;
        let loaded = self.plugin(registration.plugin)?;
        Some((registration, loaded))
    }

    fn targets(loaded: &LoadedPlugin, caller: &CallerInfo) -> bool {
        catch_unwind(AssertUnwindSafe(|| loaded.plugin.is_target(caller))).unwrap_or(false)
    }

    fn view(bound: ArgumentBound, frame: &mut SyscallFrame) -> ArgumentView<'_> {
        ArgumentView::new(
            frame.param_count,
            frame.convention.register_slot_count(),
            &mut frame.registers,
            &mut frame.stack,
        )
        .with_bound(bound)
    }

    /// Entry probe: runs before the service routine
    ///
    /// The redirect slot is primed with the service address, so the
    /// continuation is the original routine unless the plugin redirected.
    pub fn dispatch_entry(&self, frame: &mut SyscallFrame, caller: &CallerInfo) -> DispatchOutcome {
        frame.reset_continuation();
        let depth = self.tls.enter();
        if depth > 1 {
            trace!(service = frame.service, depth, "nested probe skipped");
            return DispatchOutcome {
                delivery: Delivery::Recursive,
                continuation: frame.continuation(),
            };
        }

        let service = frame.service;
        let Some((registration, loaded)) = self.target(service) else {
            return DispatchOutcome {
                delivery: Delivery::Unregistered,
                continuation: frame.continuation(),
            };
        };
        if !Self::targets(&loaded, caller) {
            return DispatchOutcome {
                delivery: Delivery::Filtered(registration.plugin),
                continuation: frame.continuation(),
            };
        }

        let completed = {
            let mut args = Self::view(self.config.arguments.bound, frame);
            catch_unwind(AssertUnwindSafe(|| {
                loaded
                    .plugin
                    .on_syscall_entry(service, registration.probe_id, &mut args, caller)
            }))
            .is_ok()
        };

        let delivery = if completed {
            Delivery::Delivered(registration.plugin)
        } else {
            error!(plugin = %loaded.name, service, "entry handler panicked");
            frame.reset_continuation();
            Delivery::Faulted(registration.plugin)
        };
        if frame.continuation() != service {
            debug!(plugin = %loaded.name, service, target = frame.continuation(), "call redirected");
        }
        DispatchOutcome {
            delivery,
            continuation: frame.continuation(),
        }
    }

    /// Exit probe: runs after the service routine returned into `frame`
    pub fn dispatch_return(&self, frame: &mut SyscallFrame, caller: &CallerInfo) -> DispatchOutcome {
        let delivery = if self.tls.depth() > 1 {
            Delivery::Recursive
        } else {
            self.deliver_return(frame, caller)
        };
        self.tls.exit();
        DispatchOutcome {
            delivery,
            continuation: frame.continuation(),
        }
    }

    fn deliver_return(&self, frame: &mut SyscallFrame, caller: &CallerInfo) -> Delivery {
        let service = frame.service;
        let Some((registration, loaded)) = self.target(service) else {
            return Delivery::Unregistered;
        };
        if !Self::targets(&loaded, caller) {
            return Delivery::Filtered(registration.plugin);
        }

        let mut args = Self::view(self.config.arguments.bound, frame);
        let completed = catch_unwind(AssertUnwindSafe(|| {
            loaded
                .plugin
                .on_syscall_return(service, registration.probe_id, &mut args, caller)
        }))
        .is_ok();

        if completed {
            Delivery::Delivered(registration.plugin)
        } else {
            error!(plugin = %loaded.name, service, "return handler panicked");
            Delivery::Faulted(registration.plugin)
        }
    }

    /// Run one intercepted call end to end
    ///
    /// `invoke` stands in for the routine at the continuation address and
    /// returns the call's result; the final return value is handed back after
    /// the exit probe had its chance to rewrite it.
    pub fn dispatch_syscall<F>(&self, frame: &mut SyscallFrame, caller: &CallerInfo, invoke: F) -> u64
    where
        F: FnOnce(u64, &mut SyscallFrame) -> u64,
    {
        let entry = self.dispatch_entry(frame, caller);
        let result = invoke(entry.continuation, frame);
        frame.set_return_value(result);
        self.dispatch_return(frame, caller);
        frame.return_value()
    }

    /// Deliver a provider event to its subscriber, true if one handled it
    pub fn dispatch_etw(&self, header: &EventHeader, flags: u32, size: u32) -> bool {
        let provider = header.provider_id;
        let Some(loaded) = self
            .registry
            .lookup_provider(&provider)
            .and_then(|id| self.plugin(id))
        else {
            return false;
        };

        let completed = catch_unwind(AssertUnwindSafe(|| {
            loaded.plugin.on_etw_event(header, flags, &provider, size)
        }))
        .is_ok();
        if !completed {
            error!(plugin = %loaded.name, %provider, "provider handler panicked");
        }
        completed
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
