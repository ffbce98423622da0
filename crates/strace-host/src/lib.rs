//! STrace reference host
//!
//! An in-process host for STrace plugins. It owns the callback registry,
//! the per-thread probe records and the event recorder, hands each plugin
//! its capability table, and dispatches captured calls and provider events
//! to whichever plugin registered for them.
//!
//! Hook installation is out of scope: callers capture a [`SyscallFrame`]
//! themselves and drive [`PluginHost::dispatch_syscall`].

pub mod config;
pub mod frame;
pub mod host;
pub mod logger;
pub mod memory;
pub mod recorder;
pub mod registry;
pub mod symbols;
pub mod tls;

pub use config::{BackpressureStrategy, HostConfig, RingBufferConfig};
pub use frame::SyscallFrame;
pub use host::{Delivery, DispatchOutcome, PluginHost};
pub use memory::SimulatedMemory;
pub use recorder::{EventRecorder, EventRing, PushOutcome, QueueStats};
pub use registry::{normalize_syscall_name, CallbackRegistry, PluginId};
pub use strace_common::{Error, Result};
pub use symbols::SymbolTable;
