//! STrace sample plugin
//!
//! Traces `NtOpenFile` and `NtClose` and the kernel process provider:
//! - the entry probe of `NtOpenFile` stashes the output handle pointer in
//!   TLS and can redirect opens made by a denied process to a stub routine
//! - the return probe reads the produced handle back through the memory
//!   capability and emits an `OpenFile` event
//! - provider events are summarized as `ProcessEvent`

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strace_common::{
    level, Error, EventHeader, FieldType, LogLevel, NtStatus, ProviderId, Result, TraceEvent,
};
use strace_core::{log_print, ArgumentView, CallerInfo, Plugin, PluginApis};

pub const PROVIDER_NAME: &str = "STrace";

/// Provider of the events this plugin emits
pub const TRACE_PROVIDER: ProviderId = ProviderId::from_fields(
    0x5cb3d8a1,
    0x3b2c,
    0x4e6f,
    [0x9a, 0x1d, 0x27, 0x6c, 0x0b, 0x4e, 0x83, 0x51],
);

/// Microsoft-Windows-Kernel-Process
pub const KERNEL_PROCESS: ProviderId = ProviderId::from_fields(
    0x22fb2cd6,
    0x0e7b,
    0x422b,
    [0xa0, 0xc7, 0x2f, 0xad, 0x1f, 0xd0, 0xe7, 0x16],
);

pub const OPEN_FILE_PROBE: u64 = 1;
pub const CLOSE_PROBE: u64 = 2;

const SLOT_HANDLE_PTR: u8 = 0;
const SLOT_REDIRECTED: u8 = 1;

#[derive(Debug, Clone)]
pub struct FileTraceOptions {
    /// Trace only this process image; every process when unset
    pub target_process: Option<String>,
    /// Opens from this process are redirected to `deny_routine`
    pub deny_process: Option<String>,
    pub deny_routine: String,
}

impl Default for FileTraceOptions {
    fn default() -> Self {
        Self {
            target_process: None,
            deny_process: None,
            deny_routine: "StpDenyOpenFile".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FileTraceStats {
    pub opens: AtomicU64,
    pub closes: AtomicU64,
    pub redirects: AtomicU64,
    pub provider_events: AtomicU64,
    pub dropped_events: AtomicU64,
    pub tls_failures: AtomicU64,
    pub log_failures: AtomicU64,
}

impl FileTraceStats {
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects.load(Ordering::Relaxed)
    }

    pub fn provider_events(&self) -> u64 {
        self.provider_events.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn tls_failures(&self) -> u64 {
        self.tls_failures.load(Ordering::Relaxed)
    }

    pub fn log_failures(&self) -> u64 {
        self.log_failures.load(Ordering::Relaxed)
    }
}

pub struct FileTracePlugin {
    options: FileTraceOptions,
    apis: OnceCell<PluginApis>,
    deny_target: Option<u64>,
    stats: Arc<FileTraceStats>,
}

impl FileTracePlugin {
    pub fn new(options: FileTraceOptions) -> Self {
        Self {
            options,
            apis: OnceCell::new(),
            deny_target: None,
            stats: Arc::new(FileTraceStats::default()),
        }
    }

    /// Counters that stay readable after the plugin is handed to a host
    pub fn stats(&self) -> Arc<FileTraceStats> {
        self.stats.clone()
    }

    fn emit(&self, apis: &PluginApis, event: &TraceEvent) {
        if apis.trace_event(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stash(&self, apis: &PluginApis, slot: u8, value: u64) {
        if apis.set_tls_data(slot, value).is_err() {
            self.stats.tls_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn log(&self, apis: &PluginApis, level: LogLevel, origin: &str, message: fmt::Arguments<'_>) {
        if apis.log_print(level, origin, message).is_err() {
            self.stats.log_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn denies(&self, caller: &CallerInfo) -> bool {
        self.options
            .deny_process
            .as_deref()
            .is_some_and(|name| caller.is_target_proc_name(name))
    }

    fn open_file_entry(&self, apis: &PluginApis, args: &mut ArgumentView<'_>, caller: &CallerInfo) {
        self.stash(apis, SLOT_HANDLE_PTR, args.read_argument(0));

        let mut redirected = false;
        if let Some(target) = self.deny_target.filter(|_| self.denies(caller)) {
            redirected = args.redirect_syscall(target).is_ok();
        }
        if redirected {
            self.stats.redirects.fetch_add(1, Ordering::Relaxed);
            self.log(
                apis,
                LogLevel::Warn,
                "OpenFile",
                format_args!("denied open from {} ({})", caller.process_name, caller.process_id),
            );
        }
        self.stash(apis, SLOT_REDIRECTED, redirected as u64);
    }

    fn open_file_return(&self, apis: &PluginApis, args: &mut ArgumentView<'_>, caller: &CallerInfo) {
        let status = NtStatus(args.read_return_value() as i32);
        let redirected = apis.get_tls_data(SLOT_REDIRECTED).unwrap_or(0) != 0;
        let handle = match apis.get_tls_data(SLOT_HANDLE_PTR) {
            Ok(ptr) if ptr != 0 && status.is_success() => apis.read_u64(ptr).unwrap_or(0),
            _ => 0,
        };

        self.stats.opens.fetch_add(1, Ordering::Relaxed);
        let access = args.read_argument(1) as u32;
        self.emit(apis, &open_file_event(caller, access, status, handle, redirected));
    }
}

impl Default for FileTracePlugin {
    fn default() -> Self {
        Self::new(FileTraceOptions::default())
    }
}

pub fn open_file_event(
    caller: &CallerInfo,
    desired_access: u32,
    status: NtStatus,
    handle: u64,
    redirected: bool,
) -> TraceEvent {
    TraceEvent::new(PROVIDER_NAME, TRACE_PROVIDER, "OpenFile")
        .field("ProcessId", FieldType::PID, caller.process_id as u32)
        .field("ProcessName", FieldType::STRING, caller.process_name.as_str())
        .field("DesiredAccess", FieldType::HEX_UINT32, desired_access)
        .field("Status", FieldType::NTSTATUS, status.as_u32())
        .field("Handle", FieldType::POINTER, handle)
        .field("Redirected", FieldType::BOOLEAN, redirected)
}

pub fn close_event(caller: &CallerInfo, handle: u64) -> TraceEvent {
    TraceEvent::new(PROVIDER_NAME, TRACE_PROVIDER, "Close")
        .with_level(level::VERBOSE)
        .field("ProcessId", FieldType::PID, caller.process_id as u32)
        .field("Handle", FieldType::HEX_UINT64, handle)
}

pub fn process_event(header: &EventHeader, flags: u32, size: u32) -> TraceEvent {
    TraceEvent::new(PROVIDER_NAME, TRACE_PROVIDER, "ProcessEvent")
        .with_keyword(header.descriptor.keyword)
        .field("EventId", FieldType::UINT16, header.descriptor.id)
        .field("ProcessId", FieldType::PID, header.process_id)
        .field("ThreadId", FieldType::TID, header.thread_id)
        .field("Flags", FieldType::HEX_UINT32, flags)
        .field("Size", FieldType::UINT32, size)
}

impl Plugin for FileTracePlugin {
    fn name(&self) -> &str {
        "file-trace"
    }

    fn tls_slots(&self) -> u8 {
        2
    }

    fn initialize(&mut self, apis: &PluginApis) -> Result<()> {
        apis.set_callback("NtOpenFile", OPEN_FILE_PROBE)?;
        apis.set_callback("NtClose", CLOSE_PROBE)?;
        apis.set_etw_callback(KERNEL_PROCESS)?;

        if self.options.deny_process.is_some() {
            self.deny_target = apis.resolve_api(&self.options.deny_routine);
            if self.deny_target.is_none() {
                self.log(
                    apis,
                    LogLevel::Warn,
                    "initialize",
                    format_args!("{} not found, opens will not be redirected", self.options.deny_routine),
                );
            }
        }

        self.apis
            .set(apis.clone())
            .map_err(|_| Error::Initialization("file-trace initialized twice".into()))?;
        log_print!(apis, LogLevel::Info, "initialize", "file-trace ready")
    }

    fn deinitialize(&self) {
        let Some(apis) = self.apis.get() else {
            return;
        };
        let results = [
            apis.unset_callback("NtOpenFile"),
            apis.unset_callback("NtClose"),
            apis.unset_etw_callback(KERNEL_PROCESS),
        ];
        let failed = results.iter().filter(|r| r.is_err()).count();
        self.log(
            apis,
            LogLevel::Info,
            "deinitialize",
            format_args!(
                "file-trace stopping after {} opens, {} unregister failures",
                self.stats.opens(),
                failed
            ),
        );
    }

    fn is_target(&self, caller: &CallerInfo) -> bool {
        self.options
            .target_process
            .as_deref()
            .map_or(true, |name| caller.is_target_proc_name(name))
    }

    fn on_syscall_entry(
        &self,
        _service: u64,
        probe_id: u64,
        args: &mut ArgumentView<'_>,
        caller: &CallerInfo,
    ) {
        let Some(apis) = self.apis.get() else {
            return;
        };
        match probe_id {
            OPEN_FILE_PROBE => self.open_file_entry(apis, args, caller),
            CLOSE_PROBE => {
                self.stats.closes.fetch_add(1, Ordering::Relaxed);
                self.emit(apis, &close_event(caller, args.read_argument(0)));
            }
            _ => {}
        }
    }

    fn on_syscall_return(
        &self,
        _service: u64,
        probe_id: u64,
        args: &mut ArgumentView<'_>,
        caller: &CallerInfo,
    ) {
        let Some(apis) = self.apis.get() else {
            return;
        };
        if probe_id == OPEN_FILE_PROBE {
            self.open_file_return(apis, args, caller);
        }
    }

    fn on_etw_event(&self, header: &EventHeader, flags: u32, provider: &ProviderId, size: u32) {
        let Some(apis) = self.apis.get() else {
            return;
        };
        if *provider != KERNEL_PROCESS {
            return;
        }
        self.stats.provider_events.fetch_add(1, Ordering::Relaxed);
        self.emit(apis, &process_event(header, flags, size));
    }
}
