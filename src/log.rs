//! A simple logging utility for emitting messages based on severity levels.
//!
//! The maximum verbosity is read once from the `SOCKMUX_LOG` environment
//! variable (`off`, `error`, `warn`, `info`, `debug`). It defaults to `info`.

use std::sync::OnceLock;
use std::{env, mem, time};

/// Source of the log message.
const SOURCE: &str = "sockmux";

/// Environment variable controlling the maximum verbosity.
pub const LOG_ENV: &str = "SOCKMUX_LOG";

/// Logs a message at the [Level::Error] level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Error, format_args!($($arg)+));
    }};
}

/// Logs a message at the [Level::Warn] level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Warn, format_args!($($arg)+));
    }};
}

/// Logs a message at the [Level::Info] level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Info, format_args!($($arg)+));
    }};
}

/// Logs a message at the [Level::Debug] level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Debug, format_args!($($arg)+));
    }};
}

/// Severity levels for log messages, ordered from most to least severe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Designates very serious errors.
    Error,
    /// Designates hazardous situations.
    Warn,
    /// Designates useful information.
    Info,
    /// Designates lower priority information.
    Debug,
}

impl Level {
    /// Parses a verbosity name. `off` yields `Some(None)`, unknown names
    /// yield `None`.
    fn parse(name: &str) -> Option<Option<Level>> {
        match name.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(None),
            "error" => Some(Some(Level::Error)),
            "warn" | "warning" => Some(Some(Level::Warn)),
            "info" => Some(Some(Level::Info)),
            "debug" | "trace" => Some(Some(Level::Debug)),
            _ => None,
        }
    }
}

/// Returns the maximum enabled level, or `None` if logging is disabled.
pub fn max_level() -> Option<Level> {
    static MAX_LEVEL: OnceLock<Option<Level>> = OnceLock::new();

    *MAX_LEVEL.get_or_init(|| {
        env::var(LOG_ENV)
            .ok()
            .and_then(|val| Level::parse(&val))
            .unwrap_or(Some(Level::Info))
    })
}

/// Returns `true` if messages at `level` are emitted.
pub fn enabled(level: Level) -> bool {
    max_level().is_some_and(|max| level <= max)
}

/// Logs a message with the specified severity level.
///
/// - [Level::Info] and [Level::Debug] messages are printed to `stdout`.
/// - [Level::Warn] and [Level::Error] messages are printed to `stderr`.
///
/// The log message will include a local timestamp, severity level, and the
/// source of the log (`sockmux`).
pub fn log(level: Level, msg: impl std::fmt::Display) {
    if !enabled(level) {
        return;
    }

    let timestamp = timestamp();

    match level {
        Level::Error => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;31mERROR\x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Warn => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;33mWARN \x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Info => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;32mINFO \x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Debug => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;34mDEBUG\x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
    }
}

fn timestamp() -> String {
    let now = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as libc::time_t;

    let mut tm: libc::tm = unsafe { mem::zeroed() };

    // `localtime_r` writes into caller storage, unlike `localtime`.
    if unsafe { libc::localtime_r(&raw const now, &raw mut tm) }.is_null() {
        return "UNKNOWN".to_string();
    }

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}
