//! STrace Core Library
//!
//! The plugin side of the STrace contract: the argument view a handler works
//! on, the capability traits a host injects, and the self-describing event
//! encoding. Hosts implement the traits; plugins implement [`Plugin`].

pub mod apis;
pub mod caller;
pub mod machine_state;
pub mod memory;
pub mod plugin;
pub mod tls;
pub mod tracelogging;
pub mod traits;

pub use apis::PluginApis;
pub use caller::{CallerInfo, ModuleInfo, StackFrame};
pub use machine_state::{ArgumentBound, ArgumentView, CallingConvention, IntoSlot};
pub use memory::{walk_chunks, AddressSpace};
pub use plugin::Plugin;
pub use strace_common::{Error, Result};
pub use tls::{PluginTls, MAX_TLS_SLOT};
pub use tracelogging::{EncodedEvent, EventMetadata};
pub use traits::*;
