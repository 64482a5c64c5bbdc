//! Severity levels.

use std::{fmt, str::FromStr};

use crate::LoggerError;

/// The severity of a record.
///
/// Levels are plain integers so that values between the named levels stay representable; the
/// named levels are spaced four apart. Ordering follows severity: `TRACE < DEBUG < INFO < WARN <
/// ERROR < FATAL < PANIC`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(i32);

const NAMED: [(Level, &str); 7] = [
    (Level::TRACE, "TRACE"),
    (Level::DEBUG, "DEBUG"),
    (Level::INFO, "INFO"),
    (Level::WARN, "WARN"),
    (Level::ERROR, "ERROR"),
    (Level::FATAL, "FATAL"),
    (Level::PANIC, "PANIC"),
];

impl Level {
    /// Very verbose diagnostics.
    pub const TRACE: Self = Self(-8);
    /// Debugging information.
    pub const DEBUG: Self = Self(-4);
    /// Normal operation.
    pub const INFO: Self = Self(0);
    /// Something unexpected that the program recovered from.
    pub const WARN: Self = Self(4);
    /// A failed operation.
    pub const ERROR: Self = Self(8);
    /// A failure after which the process exits.
    pub const FATAL: Self = Self(12);
    /// A failure after which the current thread panics.
    pub const PANIC: Self = Self(16);

    /// Creates a level from its numeric value.
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the numeric value of the level.
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns the name of the level if it is exactly one of the named levels.
    pub fn name(self) -> Option<&'static str> {
        NAMED
            .iter()
            .find(|(level, _)| *level == self)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for Level {
    /// Named levels print their name, other values print relative to the closest lower named
    /// level, e.g. `INFO+2` or `TRACE-4`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NAMED.iter().rev().find(|(level, _)| level <= self) {
            Some((base, name)) if base == self => f.write_str(name),
            Some((base, name)) => write!(f, "{name}+{}", self.0 - base.0),
            None => write!(f, "TRACE{}", self.0 - Self::TRACE.0),
        }
    }
}

impl FromStr for Level {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::TRACE),
            "debug" => Ok(Self::DEBUG),
            "" | "info" => Ok(Self::INFO),
            "warn" | "warning" => Ok(Self::WARN),
            "error" => Ok(Self::ERROR),
            "fatal" => Ok(Self::FATAL),
            "panic" => Ok(Self::PANIC),
            other => Err(LoggerError::Configuration(format!(
                "unknown log level `{other}`"
            ))),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::TRACE,
            tracing::Level::DEBUG => Self::DEBUG,
            tracing::Level::INFO => Self::INFO,
            tracing::Level::WARN => Self::WARN,
            tracing::Level::ERROR => Self::ERROR,
        }
    }
}

impl From<Level> for tracing_subscriber::filter::LevelFilter {
    /// The most verbose `tracing` filter that still lets every event at `level` or above pass.
    fn from(level: Level) -> Self {
        if level < Level::DEBUG {
            Self::TRACE
        } else if level < Level::INFO {
            Self::DEBUG
        } else if level < Level::WARN {
            Self::INFO
        } else if level < Level::ERROR {
            Self::WARN
        } else {
            Self::ERROR
        }
    }
}
