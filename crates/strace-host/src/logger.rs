//! Plugin log forwarding

use std::fmt;
use strace_common::logging::PLUGIN_TARGET;
use strace_common::{LogLevel, Result};
use strace_core::LogSink;
use tracing::{debug, error, info, warn};

/// Forwards a plugin's log lines to `tracing`, tagged with the plugin name
#[derive(Debug, Clone)]
pub struct HostLogger {
    plugin: String,
}

impl HostLogger {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }
}

impl LogSink for HostLogger {
    fn log_print(&self, level: LogLevel, origin: &str, message: fmt::Arguments<'_>) -> Result<()> {
        let plugin = self.plugin.as_str();
        match level {
            LogLevel::Debug => debug!(target: PLUGIN_TARGET, plugin, origin, "{}", message),
            LogLevel::Info => info!(target: PLUGIN_TARGET, plugin, origin, "{}", message),
            LogLevel::Warn => warn!(target: PLUGIN_TARGET, plugin, origin, "{}", message),
            LogLevel::Error => error!(target: PLUGIN_TARGET, plugin, origin, "{}", message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_level_succeeds() {
        let logger = HostLogger::new("sample");
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert!(logger
                .log_print(level, "OpenFile", format_args!("handle {:#x}", 4))
                .is_ok());
        }
        assert_eq!(logger.plugin(), "sample");
    }
}
