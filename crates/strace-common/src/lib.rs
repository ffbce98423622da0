//! STrace Common Types
//!
//! Status codes, errors, logging setup and the event field types shared by
//! plugins and the hosts that load them.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::{
    init_debug_logging, init_host_logging, init_logging, init_logging_from_file, LogConfig,
    PLUGIN_TARGET,
};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
