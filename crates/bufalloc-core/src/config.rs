//! Allocator configuration.
//!
//! Two settings can come from the environment:
//! - `BUFALLOC_FAILURE_POLICY`: `recoverable` (default) returns every failure
//!   as an [`AllocError`](crate::AllocError). `abort` logs contract violations
//!   at ERROR and then aborts the process.
//! - `BUFALLOC_LOG`: minimum level kept by each allocator's lifecycle log
//!   (`trace`, `debug`, `info` (default), `warn`, `error`).
//!
//! Both are read once and cached.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::header::WORD;
use crate::log::LogLevel;

/// Alignment used when a caller does not pass one: two machine words.
pub const DEFAULT_ALIGN: usize = 2 * WORD;

/// What an allocator does after logging a contract violation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Return the error to the caller.
    #[default]
    Recoverable,
    /// Abort the process after logging the violation.
    Abort,
}

impl FailurePolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "fatal" | "strict" | "panic" => Self::Abort,
            _ => Self::Recoverable,
        }
    }
}

/// Per-allocator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Alignment applied by operations that do not take one explicitly.
    pub align: usize,
    pub failure_policy: FailurePolicy,
    /// Records below this level are dropped.
    pub log_level: LogLevel,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            align: DEFAULT_ALIGN,
            failure_policy: FailurePolicy::Recoverable,
            log_level: LogLevel::Info,
        }
    }
}

impl AllocatorConfig {
    /// Default alignment with policy and log level taken from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            align: DEFAULT_ALIGN,
            failure_policy: failure_policy(),
            log_level: log_level(),
        }
    }

    #[must_use]
    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }
}

// 0 = unresolved, otherwise the encoded value + 1.
static CACHED_POLICY: AtomicU8 = AtomicU8::new(0);
static CACHED_LOG_LEVEL: AtomicU8 = AtomicU8::new(0);

fn policy_to_u8(policy: FailurePolicy) -> u8 {
    match policy {
        FailurePolicy::Recoverable => 1,
        FailurePolicy::Abort => 2,
    }
}

fn u8_to_policy(v: u8) -> FailurePolicy {
    match v {
        2 => FailurePolicy::Abort,
        _ => FailurePolicy::Recoverable,
    }
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Trace => 1,
        LogLevel::Debug => 2,
        LogLevel::Info => 3,
        LogLevel::Warn => 4,
        LogLevel::Error => 5,
    }
}

fn u8_to_level(v: u8) -> LogLevel {
    match v {
        1 => LogLevel::Trace,
        2 => LogLevel::Debug,
        4 => LogLevel::Warn,
        5 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Failure policy from `BUFALLOC_FAILURE_POLICY` (cached after the first call).
#[must_use]
pub fn failure_policy() -> FailurePolicy {
    let cached = CACHED_POLICY.load(Ordering::Relaxed);
    if cached != 0 {
        return u8_to_policy(cached);
    }
    let policy = std::env::var("BUFALLOC_FAILURE_POLICY")
        .map(|v| FailurePolicy::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_POLICY.store(policy_to_u8(policy), Ordering::Release);
    policy
}

/// Minimum log level from `BUFALLOC_LOG` (cached after the first call).
#[must_use]
pub fn log_level() -> LogLevel {
    let cached = CACHED_LOG_LEVEL.load(Ordering::Relaxed);
    if cached != 0 {
        return u8_to_level(cached);
    }
    let level = std::env::var("BUFALLOC_LOG")
        .map(|v| LogLevel::from_str_loose(&v))
        .unwrap_or(LogLevel::Info);
    CACHED_LOG_LEVEL.store(level_to_u8(level), Ordering::Release);
    level
}
