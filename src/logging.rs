//! Injected logging handle.
//!
//! Components receive a [`Logger`] at construction instead of reaching for the
//! global `log` macros. The default sink forwards to whatever backend the host
//! installed through the `log` facade; tests can hand in a [`MemoryLog`] and
//! inspect exactly what a component reported.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::{Level, Log, Metadata, Record};

/// Forwards to the process-wide `log` backend.
struct FacadeLog;

impl Log for FacadeLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: &'static str,
}

impl Logger {
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self {
            sink,
            target: "promptshelf",
        }
    }

    /// Same sink, different target (one per component).
    pub fn scoped(&self, target: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .level(level)
            .target(self.target)
            .args(args)
            .build();
        if self.sink.enabled(record.metadata()) {
            self.sink.log(&record);
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args)
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args)
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args)
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(FacadeLog))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("target", &self.target).finish()
    }
}

/// A captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// In-memory sink, mostly for tests and diagnostics panels.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|l| l.level == level && l.message.contains(needle))
    }
}

impl Log for MemoryLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(LogLine {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
        }
    }

    fn flush(&self) {}
}
