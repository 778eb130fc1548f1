//! Per-controller logger over `tracing`.
//!
//! Hosts choose verbosity per controller instance through [`LogLevel`];
//! the actual sink is whatever `tracing` subscriber the host installed.

use std::fmt::Display;

use crate::config::LogLevel;

/// Context-tagged logger. `debug` is gated by the configured level,
/// `error` is always emitted.
#[derive(Debug, Clone)]
pub struct Logger {
    context: &'static str,
    level: LogLevel,
}

impl Logger {
    pub fn new(context: &'static str, level: LogLevel) -> Self {
        Self { context, level }
    }

    pub fn debug_enabled(&self) -> bool {
        self.level == LogLevel::Debug
    }

    pub fn debug(&self, message: impl Display) {
        if self.debug_enabled() {
            tracing::debug!(context = self.context, "{}", message);
        }
    }

    pub fn error(&self, message: impl Display) {
        tracing::error!(context = self.context, "{}", message);
    }
}
