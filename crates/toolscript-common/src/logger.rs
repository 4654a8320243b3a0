//! Host logger handed to scripts.
//!
//! [`Logger`] is the host-side logging service a script reaches through its
//! logger capability. Messages below the logger's threshold are dropped,
//! everything else is emitted through `tracing` tagged with the source script.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Log level for host and guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl LogLevel {
    /// Convert a numeric log level received from a guest.
    ///
    /// 0=debug, 1=info, 2=warn, 3=error; unknown values map to info.
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => LogLevel::Debug,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    /// Numeric value of this level as seen by guests.
    pub fn as_i32(self) -> i32 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }
}

/// Host logging service.
#[derive(Debug, Clone)]
pub struct Logger {
    name: String,
    min_level: LogLevel,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("toolchain")
    }
}

impl Logger {
    /// Create a logger that emits info and above.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_level: LogLevel::Info,
        }
    }

    /// Set the lowest level that is emitted.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Logger name, used as the `logger` field on every event.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowest level that is emitted.
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Returns `true` if messages at `level` are emitted.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Emit a message on behalf of `source`.
    ///
    /// Returns `false` if the message was filtered out.
    pub fn log(&self, level: LogLevel, source: &str, message: &str) -> bool {
        if !self.enabled(level) {
            return false;
        }

        let logger = self.name.as_str();
        match level {
            LogLevel::Debug => debug!(logger, source, guest_log = true, "{}", message),
            LogLevel::Info => info!(logger, source, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(logger, source, guest_log = true, "{}", message),
            LogLevel::Error => error!(logger, source, guest_log = true, "{}", message),
        }
        true
    }
}
