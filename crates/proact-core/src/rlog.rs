//! Leveled stderr logging for the runtime.
//!
//! Thread-safe, optionally-flushing diagnostic output. Levels and flush
//! behavior come from the environment so production binaries stay quiet
//! by default.
//!
//! # Environment Variables
//!
//! - `PROACT_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace
//!   (or 0-5). Default: warn.
//! - `PROACT_FLUSH_LOG=1` - flush stderr after each line.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels, least to most verbose.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize from environment variables. Called automatically on first
/// log; calling it explicitly gives deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(val) = std::env::var("PROACT_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Warn,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
    if let Ok(val) = std::env::var("PROACT_FLUSH_LOG") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }
}

/// Set the level programmatically (overrides the environment).
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Check whether a level is enabled.
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Internal: leveled line write. Locks stderr so lines stay atomic.
#[doc(hidden)]
pub fn _rlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Error level log.
#[macro_export]
macro_rules! rt_error {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::LogLevel::Error, format_args!($($arg)*));
    }};
}

/// Warning level log.
#[macro_export]
macro_rules! rt_warn {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::LogLevel::Warn, format_args!($($arg)*));
    }};
}

/// Info level log.
#[macro_export]
macro_rules! rt_info {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::LogLevel::Info, format_args!($($arg)*));
    }};
}

/// Debug level log.
#[macro_export]
macro_rules! rt_debug {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Trace level log (most verbose).
#[macro_export]
macro_rules! rt_trace {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::LogLevel::Trace, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_macros_compile() {
        set_log_level(LogLevel::Off);
        rt_error!("error {}", "msg");
        rt_warn!("warn");
        rt_info!("info {}", 42);
        rt_debug!("debug");
        rt_trace!("trace");
    }
}
