//! The interface every STrace plugin implements

use crate::apis::PluginApis;
use crate::caller::CallerInfo;
use crate::machine_state::ArgumentView;
use strace_common::{EventHeader, ProviderId, Result};

/// A syscall-interception plugin
///
/// Handlers run synchronously on the intercepted thread and may run on
/// several threads at once, so a plugin synchronizes its own state.
pub trait Plugin: Send + Sync {
    /// Name used in host logs
    fn name(&self) -> &str;

    /// Thread-local slots the plugin wants reserved at load
    fn tls_slots(&self) -> u8 {
        0
    }

    /// Called once after load with the capabilities for this plugin
    ///
    /// Registrations are normally made here. An error aborts the load and
    /// the host retracts anything registered before the failure.
    fn initialize(&mut self, apis: &PluginApis) -> Result<()>;

    /// Called once before unload, while registrations are still active
    fn deinitialize(&self) {}

    /// Whether calls made by `caller` reach the syscall handlers
    fn is_target(&self, _caller: &CallerInfo) -> bool {
        true
    }

    /// Before the original implementation runs
    ///
    /// The view may be rewritten and the call redirected through
    /// [`ArgumentView::redirect_syscall`].
    fn on_syscall_entry(
        &self,
        _service: u64,
        _probe_id: u64,
        _args: &mut ArgumentView<'_>,
        _caller: &CallerInfo,
    ) {
    }

    /// After the original (or redirected) implementation returned
    fn on_syscall_return(
        &self,
        _service: u64,
        _probe_id: u64,
        _args: &mut ArgumentView<'_>,
        _caller: &CallerInfo,
    ) {
    }

    /// A provider event the plugin subscribed to
    fn on_etw_event(&self, _header: &EventHeader, _flags: u32, _provider: &ProviderId, _size: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::fakes::{apis, Recorder};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Counter {
        entries: AtomicU64,
    }

    impl Plugin for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn initialize(&mut self, apis: &PluginApis) -> Result<()> {
            apis.set_callback("OpenFile", 7)
        }

        fn on_syscall_entry(
            &self,
            _service: u64,
            probe_id: u64,
            args: &mut ArgumentView<'_>,
            _caller: &CallerInfo,
        ) {
            self.entries.fetch_add(probe_id, Ordering::Relaxed);
            args.write_argument(0, 0u64);
        }
    }

    #[test]
    fn test_defaults_and_dispatch_through_trait_object() {
        let rec = Arc::new(Recorder::default());
        let mut plugin: Box<dyn Plugin> = Box::new(Counter {
            entries: AtomicU64::new(0),
        });
        assert_eq!(plugin.tls_slots(), 0);
        plugin.initialize(&apis(&rec, 0, 0)).unwrap();
        assert_eq!(rec.syscalls.lock()["OpenFile"], 7);

        let mut regs = [5u64; 4];
        let mut view = ArgumentView::new(1, 4, &mut regs, &mut []);
        let caller = CallerInfo::new(1, "a.exe");
        assert!(plugin.is_target(&caller));
        plugin.on_syscall_entry(0x1000, 7, &mut view, &caller);
        plugin.on_syscall_return(0x1000, 7, &mut view, &caller);
        plugin.deinitialize();
        assert_eq!(regs[0], 0);
    }
}
