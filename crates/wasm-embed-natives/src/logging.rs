//! Logging native function.
//!
//! Guest log lines are both kept in a shared buffer the embedder can inspect
//! and emitted via the `tracing` crate.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

/// Log level of a guest log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A log line emitted by guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Instant,
}

/// Buffer of guest log lines, shared between the native function and the
/// embedder.
pub type GuestLogs = Arc<Mutex<Vec<LogEntry>>>;

/// Host implementation of `env.log`.
///
/// Logs are both:
/// 1. Stored in the [`GuestLogs`] buffer for later retrieval
/// 2. Emitted via the `tracing` crate for observability
#[derive(Debug, Clone, Default)]
pub struct LoggingHost {
    logs: GuestLogs,
}

impl LoggingHost {
    /// Create a host with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host writing into an existing buffer.
    pub fn with_logs(logs: GuestLogs) -> Self {
        Self { logs }
    }

    /// The shared buffer.
    pub fn logs(&self) -> GuestLogs {
        Arc::clone(&self.logs)
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().push(LogEntry {
            level,
            message: message.to_string(),
            timestamp: Instant::now(),
        });

        match level {
            LogLevel::Debug => debug!(guest_log = true, "{}", message),
            LogLevel::Info => info!(guest_log = true, "{}", message),
            LogLevel::Warn => warn!(guest_log = true, "{}", message),
            LogLevel::Error => error!(guest_log = true, "{}", message),
        }
    }

    /// Messages logged so far, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.logs
            .lock()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Drop all buffered lines.
    pub fn clear(&self) {
        self.logs.lock().clear();
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// Guests pass 0=debug, 1=info, 2=warn, 3=error; anything else is info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Convert a [`LogLevel`] to a numeric value.
pub fn level_to_i32(level: LogLevel) -> i32 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_stores_in_buffer() {
        let host = LoggingHost::new();

        host.log(LogLevel::Info, "Hello");
        host.log(LogLevel::Error, "World");

        let logs = host.logs();
        let logs = logs.lock();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "Hello");
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[1].message, "World");
        assert_eq!(logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_shared_buffer() {
        let logs = GuestLogs::default();
        let host = LoggingHost::with_logs(Arc::clone(&logs));

        host.log(LogLevel::Debug, "shared");
        assert_eq!(logs.lock().len(), 1);

        host.clear();
        assert!(host.messages().is_empty());
    }

    #[test]
    fn test_level_from_i32() {
        assert_eq!(level_from_i32(0), LogLevel::Debug);
        assert_eq!(level_from_i32(1), LogLevel::Info);
        assert_eq!(level_from_i32(2), LogLevel::Warn);
        assert_eq!(level_from_i32(3), LogLevel::Error);
        assert_eq!(level_from_i32(99), LogLevel::Info);
    }

    #[test]
    fn test_level_to_i32() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(level_from_i32(level_to_i32(level)), level);
        }
    }
}
