//! Logging setup for STrace hosts
//!
//! Hosts log through `tracing`. Plugin log prints are forwarded into the same
//! subscriber under the [`PLUGIN_TARGET`] target, so their verbosity can be
//! tuned apart from the host's own diagnostics.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target plugin log prints are emitted under
pub const PLUGIN_TARGET: &str = "strace::plugin";

static TRACE_FILE: Mutex<Option<(PathBuf, File)>> = Mutex::new(None);

/// The `[logging]` table of the host config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Host level, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,

    /// Level for plugin log prints; follows `level` when unset
    #[serde(default)]
    pub plugin_level: Option<String>,

    #[serde(default = "default_true")]
    pub console: bool,

    /// Also append to this file
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// Include file/line of the call site
    #[serde(default)]
    pub call_sites: bool,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            plugin_level: None,
            console: true,
            file: None,
            ansi_colors: true,
            call_sites: false,
        }
    }
}

impl LogConfig {
    /// Everything at debug with call sites, plugin prints at trace
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            plugin_level: Some("trace".to_string()),
            call_sites: true,
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_plugin_level(mut self, level: &str) -> Self {
        self.plugin_level = Some(level.to_string());
        self
    }

    /// Filter directives for `EnvFilter`
    pub fn directives(&self) -> String {
        match &self.plugin_level {
            Some(plugin) => format!("{},{}={}", self.level, PLUGIN_TARGET, plugin),
            None => self.level.clone(),
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.directives())
            .map_err(|e| Error::Config(format!("invalid log filter '{}': {}", self.directives(), e)))
    }
}

fn trace_file_writer() -> Box<dyn Write + Send> {
    let guard = TRACE_FILE.lock();
    match guard.as_ref().and_then(|(_, file)| file.try_clone().ok()) {
        Some(file) => Box::new(file),
        None => Box::new(std::io::sink()),
    }
}

/// Install the global subscriber
///
/// A subscriber that is already installed wins; the call still succeeds.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("cannot open log file {}: {}", path.display(), e)))?;
            *TRACE_FILE.lock() = Some((path.clone(), file));
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_file(config.call_sites)
                    .with_line_number(config.call_sites)
                    .with_writer(trace_file_writer),
            )
        }
        None => None,
    };

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_ansi(config.ansi_colors)
            .with_file(config.call_sites)
            .with_line_number(config.call_sites)
            .with_writer(std::io::stderr)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    Ok(())
}

pub fn init_host_logging() -> Result<()> {
    init_logging(&LogConfig::default())
}

pub fn init_debug_logging() -> Result<()> {
    init_logging(&LogConfig::debug())
}

/// Initialize from the `[logging]` table of a host config file
pub fn init_logging_from_file(path: impl AsRef<Path>) -> Result<()> {
    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default)]
        logging: LogConfig,
    }

    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
    let wrapper: Wrapper = toml::from_str(&content)?;
    init_logging(&wrapper.logging)
}

/// File the subscriber appends to, if any
pub fn log_file_path() -> Option<PathBuf> {
    TRACE_FILE.lock().as_ref().map(|(path, _)| path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert!(config.console);
        assert!(config.file.is_none());
        assert_eq!(config.directives(), "info");
    }

    #[test]
    fn test_plugin_level_directive() {
        let config = LogConfig::default().with_plugin_level("warn");
        assert_eq!(config.directives(), "info,strace::plugin=warn");
        assert_eq!(LogConfig::debug().directives(), "debug,strace::plugin=trace");
    }

    #[test]
    fn test_invalid_directive_rejected() {
        let config = LogConfig {
            level: "strace=loud".to_string(),
            ..Default::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(config.filter(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LogConfig =
            toml::from_str("plugin_level = \"debug\"\nfile = \"plugin.log\"").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.plugin_level.as_deref(), Some("debug"));
        assert_eq!(config.file, Some(PathBuf::from("plugin.log")));
        assert!(config.console);
    }

    #[test]
    fn test_missing_config_file() {
        let err = init_logging_from_file("/nonexistent/strace.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
