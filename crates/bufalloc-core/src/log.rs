//! Structured allocator lifecycle logging.
//!
//! Each allocator owns a [`LifecycleLog`]. Records carry a monotonic decision
//! id, a correlation trace id, a severity and a machine-readable event label.
//! They are kept in memory (drained by callers or tests) and optionally
//! forwarded to a [`DiagnosticSink`].
//!
//! Records below the minimum level cost nothing: details are formatted only
//! after the level check, so a quiet allocator never touches the heap. At most
//! [`DEFAULT_MAX_RECORDS`] records are retained between drains; later ones
//! still reach the sink and are counted by [`LifecycleLog::dropped`].

use std::fmt;

use serde::Serialize;

use crate::config::FailurePolicy;
use crate::error::{AllocError, ErrorKind};

/// Records retained in memory before new ones are only forwarded to the sink.
pub const DEFAULT_MAX_RECORDS: usize = 4096;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (case-insensitive); unknown input maps to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" | "err" => Self::Error,
            _ => Self::Info,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERR",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Monotonic decision/event id, per allocator.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    pub level: LogLevel,
    /// Allocator family (`arena`, `stack`, `pool`, `free_list`, `dyn_array`).
    pub allocator: &'static str,
    /// Operation that produced the record (`alloc`, `free`, `pop`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `exhausted`, `coalesce`, ...).
    pub event: &'static str,
    /// Buffer offset involved in the event.
    pub offset: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
}

impl LogRecord {
    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Human-readable single line, e.g. `WARN  pool::alloc exhausted (...)`.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{:<5} {}::{} {} [{}] {}",
            self.level.as_str(),
            self.allocator,
            self.symbol,
            self.event,
            self.outcome,
            self.details
        )
    }
}

/// Receiver for lifecycle records (the diagnostic sink).
pub trait DiagnosticSink: Send {
    fn emit(&mut self, record: &LogRecord);
}

impl<F> DiagnosticSink for F
where
    F: FnMut(&LogRecord) + Send,
{
    fn emit(&mut self, record: &LogRecord) {
        self(record);
    }
}

/// Writes each record to stderr as one line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&mut self, record: &LogRecord) {
        eprintln!("{}", record.to_line());
    }
}

/// Per-allocator log buffer plus failure-policy enforcement.
pub struct LifecycleLog {
    allocator: &'static str,
    min_level: LogLevel,
    policy: FailurePolicy,
    next_decision_id: u64,
    records: Vec<LogRecord>,
    max_records: usize,
    dropped: u64,
    sink: Option<Box<dyn DiagnosticSink>>,
}

impl LifecycleLog {
    #[must_use]
    pub fn new(allocator: &'static str, min_level: LogLevel, policy: FailurePolicy) -> Self {
        Self {
            allocator,
            min_level,
            policy,
            next_decision_id: 1,
            records: Vec::new(),
            max_records: DEFAULT_MAX_RECORDS,
            dropped: 0,
            sink: None,
        }
    }

    /// Forward every kept record to `sink` as well.
    pub fn set_sink(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.sink = Some(sink);
    }

    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Caps the number of retained records. Zero keeps none.
    pub fn set_max_records(&mut self, max: usize) {
        self.max_records = max;
    }

    /// Records that reached the log after the retention cap was hit.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        &mut self,
        level: LogLevel,
        symbol: &'static str,
        event: &'static str,
        offset: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl fmt::Display,
    ) {
        if !self.enabled(level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        let record = LogRecord {
            decision_id,
            trace_id: format!(
                "bufalloc::{}::{}::{:016x}",
                self.allocator, symbol, decision_id
            ),
            level,
            allocator: self.allocator,
            symbol,
            event,
            offset,
            size,
            outcome,
            details: details.to_string(),
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.emit(&record);
        }
        if self.records.len() < self.max_records {
            self.records.push(record);
        } else {
            self.dropped = self.dropped.wrapping_add(1);
        }
    }

    /// Logs `err` at the level its kind calls for and hands it back.
    ///
    /// Under [`FailurePolicy::Abort`] a contract violation terminates the
    /// process after the record has been emitted.
    pub(crate) fn reject(
        &mut self,
        symbol: &'static str,
        err: AllocError,
        offset: Option<usize>,
        size: Option<usize>,
    ) -> AllocError {
        let (level, outcome) = match err.kind() {
            ErrorKind::ContractViolation => (LogLevel::Error, "violation"),
            ErrorKind::Exhausted => (LogLevel::Warn, "exhausted"),
            ErrorKind::InvalidArgument => (LogLevel::Warn, "rejected"),
        };
        self.record(level, symbol, err.event(), offset, size, outcome, &err);
        if err.kind().is_fatal() && self.policy == FailurePolicy::Abort {
            eprintln!("bufalloc: {}::{symbol}: {err}", self.allocator);
            std::process::abort();
        }
        err
    }

    /// Returns a view of the kept records.
    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Drains the kept records and resets the dropped counter.
    pub fn drain(&mut self) -> Vec<LogRecord> {
        self.dropped = 0;
        std::mem::take(&mut self.records)
    }
}

impl fmt::Debug for LifecycleLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleLog")
            .field("allocator", &self.allocator)
            .field("min_level", &self.min_level)
            .field("policy", &self.policy)
            .field("records", &self.records.len())
            .field("dropped", &self.dropped)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
