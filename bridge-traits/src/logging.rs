//! Host Log Forwarding
//!
//! The core mirrors its `tracing` events to a [`LoggerSink`] so a host can
//! route them into journald, a log file or its own console. Each entry
//! carries the fields of the device session span it was recorded in, merged
//! with the event's own fields.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive spelling, as accepted by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forwarded log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub message: String,
    /// Span fields first, overridden by event fields of the same name
    pub fields: BTreeMap<String, String>,
    /// Name of the innermost span, e.g. `device_session`
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Receives log entries from the core.
///
/// Entries reach the sink with device serials already masked unless the
/// host turned redaction off.
///
/// ```ignore
/// struct Journal;
///
/// #[async_trait]
/// impl LoggerSink for Journal {
///     async fn log(&self, entry: LogEntry) -> Result<()> {
///         journald::send(entry.level, &entry.message, &entry.fields)
///     }
/// }
/// ```
#[async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Entries below this level are dropped before they are built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_fields() {
        let entry = LogEntry::new(LogLevel::Info, "core_sync", "Session started")
            .with_field("mount_path", "/media/ipod")
            .with_field("mount_path", "/media/IPOD");

        assert_eq!(entry.field("mount_path"), Some("/media/IPOD"));
        assert_eq!(entry.field("session_id"), None);
        assert_eq!(entry.span, None);
    }

    #[test]
    fn test_log_level_ordering_and_spelling() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_log_entry_serializes_lowercase_level() {
        let entry = LogEntry::new(LogLevel::Debug, "core_cache", "Baseline saved");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "debug");
    }
}
