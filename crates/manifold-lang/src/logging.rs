//! Logging bridge between the evaluator and the host.
//!
//! Compilations emit diagnostics through a [`LogSink`] so embedders decide
//! where output goes. [`TracingSink`] forwards to `tracing` events and is
//! the default; [`MemorySink`] captures entries for assertions in tests.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Diagnostic levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A single emitted diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    /// Source path, when the diagnostic has a location.
    pub path: Option<String>,
    /// 1-based line, when located.
    pub line: Option<usize>,
    /// 1-based column, when located.
    pub column: Option<usize>,
    /// The text of the offending line, when located.
    pub text: Option<String>,
}

impl LogEntry {
    /// A located-nowhere entry.
    pub fn bare(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            path: None,
            line: None,
            column: None,
            text: None,
        }
    }
}

/// Destination for compilation diagnostics.
pub trait LogSink: Send {
    /// Emit an entry.
    fn log(&mut self, entry: LogEntry);

    /// Whether a given level would be emitted; lets callers skip message
    /// formatting entirely.
    fn would_log(&self, _level: Level) -> bool {
        true
    }
}

/// Sink that forwards entries to `tracing` events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, entry: LogEntry) {
        let location = match (&entry.path, entry.line) {
            (Some(path), Some(line)) => format!("{}:{}", path, line),
            (Some(path), None) => path.clone(),
            _ => String::new(),
        };
        match entry.level {
            Level::Debug => tracing::debug!(%location, "{}", entry.message),
            Level::Info => tracing::info!(%location, "{}", entry.message),
            Level::Notice => tracing::info!(%location, notice = true, "{}", entry.message),
            Level::Warning => tracing::warn!(%location, "{}", entry.message),
            Level::Error => tracing::error!(%location, "{}", entry.message),
        }
    }
}

/// Sink that records entries in memory.
///
/// Clones share the same buffer, so a test can keep one handle while the
/// compilation owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().expect("log sink poisoned").clone()
    }

    /// Messages logged at a given level.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries
            .lock()
            .expect("log sink poisoned")
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.clone())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn log(&mut self, entry: LogEntry) {
        self.entries.lock().expect("log sink poisoned").push(entry);
    }
}

/// A shareable handle to a log sink.
///
/// Compilations, environments, and evaluation contexts all hold clones of
/// the same handle.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<Mutex<dyn LogSink>>,
}

impl Logger {
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// A logger that forwards to `tracing`.
    pub fn tracing() -> Self {
        Self::new(TracingSink)
    }

    pub fn log(&self, entry: LogEntry) {
        self.sink.lock().expect("log sink poisoned").log(entry);
    }

    pub fn would_log(&self, level: Level) -> bool {
        self.sink.lock().expect("log sink poisoned").would_log(level)
    }

    /// Convenience for a located-nowhere entry.
    pub fn emit(&self, level: Level, message: impl Into<String>) {
        self.log(LogEntry::bare(level, message));
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Notice < Level::Warning);
        assert!(Level::Warning < Level::Error);
    }

    #[test]
    fn memory_sink_shares_buffer_across_clones() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.log(LogEntry::bare(Level::Notice, "hi"));
        assert_eq!(sink.messages(Level::Notice), vec!["hi".to_string()]);
    }
}
