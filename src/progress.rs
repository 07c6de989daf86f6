//! Progress and log callbacks: the only part of the original UI surface
//! (HTML file pickers, progress bars, tab switching) that is in scope here.
//! See spec.md §6.

/// Severity of a single log line. Purely observational — nothing in this
/// crate changes behavior based on the level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Receives progress percentages, invoked monotonically, at least once per
/// meaningful milestone (header parse, per-N SVF commands, per Xilinx step,
/// per configuration chunk).
pub struct ProgressSink<'a> {
    callback: Box<dyn FnMut(u8) + 'a>,
}

impl<'a> ProgressSink<'a> {
    pub fn new<F: FnMut(u8) + 'a>(callback: F) -> Self {
        Self { callback: Box::new(callback) }
    }

    /// A sink that discards every update; useful when a caller doesn't
    /// care about progress (e.g. in tests).
    pub fn none() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&mut self, percent: u8) {
        (self.callback)(percent.min(100));
    }
}

/// Receives human-readable log lines.
pub struct LogSink<'a> {
    callback: Box<dyn FnMut(LogLevel, &str) + 'a>,
}

impl<'a> LogSink<'a> {
    pub fn new<F: FnMut(LogLevel, &str) + 'a>(callback: F) -> Self {
        Self { callback: Box::new(callback) }
    }

    pub fn none() -> Self {
        Self::new(|_, _| {})
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        (self.callback)(LogLevel::Info, message.as_ref());
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        (self.callback)(LogLevel::Warning, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        (self.callback)(LogLevel::Error, message.as_ref());
    }

    pub fn success(&mut self, message: impl AsRef<str>) {
        (self.callback)(LogLevel::Success, message.as_ref());
    }
}
