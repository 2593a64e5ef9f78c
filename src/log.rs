//! Logging. See the [`log`](https://docs.rs/log/) crate's documentation for
//! the facade this module plugs into.
//!
//! Example:
//! ```no_run
//! use log::{info, LevelFilter};
//! use tarantool_core::log::{CoreLogger, SayLevel};
//!
//! static LOGGER: CoreLogger = CoreLogger::new();
//! log::set_logger(&LOGGER).unwrap();
//! log::set_max_level(LevelFilter::Debug);
//! info!("engine started");
//! ```

use log::{Level, Log, Metadata, Record};
use std::sync::atomic::{AtomicU32, Ordering};

/// The engine's own level vocabulary (`say_*` in the original `say.c`),
/// kept distinct from [`log::Level`] so a caller's log-level configuration
/// doesn't need to speak in the facade's four-level vocabulary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SayLevel {
    Fatal = 0,
    System = 1,
    Error = 2,
    Crit = 3,
    Warn = 4,
    Info = 5,
    Verbose = 6,
    Debug = 7,
}

impl SayLevel {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Fatal,
            1 => Self::System,
            2 => Self::Error,
            3 => Self::Crit,
            4 => Self::Warn,
            5 => Self::Info,
            6 => Self::Verbose,
            7 => Self::Debug,
            _ => return None,
        })
    }
}

impl From<Level> for SayLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => SayLevel::Error,
            Level::Warn => SayLevel::Warn,
            Level::Info => SayLevel::Info,
            Level::Debug => SayLevel::Debug,
            Level::Trace => SayLevel::Debug,
        }
    }
}

static CURRENT_LEVEL: AtomicU32 = AtomicU32::new(SayLevel::Info as u32);

/// Get the current log level threshold.
pub fn current_level() -> SayLevel {
    SayLevel::from_u32(CURRENT_LEVEL.load(Ordering::Relaxed)).unwrap_or(SayLevel::Info)
}

/// Set the current log level threshold.
pub fn set_current_level(level: SayLevel) {
    CURRENT_LEVEL.store(level as u32, Ordering::Relaxed);
}

/// A [`Log`] implementation that writes to stderr, with a configurable
/// [`Level`]-to-[`SayLevel`] mapping. Named for parity with the original
/// `say()`-based logger this module is modeled on.
pub struct CoreLogger(fn(Level) -> SayLevel);

impl CoreLogger {
    pub const fn new() -> Self {
        const DEFAULT_MAPPING: fn(Level) -> SayLevel = |l: Level| l.into();
        CoreLogger(DEFAULT_MAPPING)
    }

    pub fn with_mapping(map_fn: fn(Level) -> SayLevel) -> Self {
        CoreLogger(map_fn)
    }

    pub fn convert_level(&self, level: Level) -> SayLevel {
        (self.0)(level)
    }
}

impl Default for CoreLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for CoreLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.convert_level(metadata.level()) <= current_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!(
            "[{level:?}] {file}:{line}: {args}",
            level = self.convert_level(record.level()),
            file = record.file().unwrap_or("?"),
            line = record.line().unwrap_or(0),
            args = record.args(),
        );
    }

    fn flush(&self) {}
}
