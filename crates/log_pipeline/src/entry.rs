//! A fluent builder for one-off log records.
//!
//! ```
//! use log_pipeline::{entry, fields};
//!
//! let result: Result<(), std::io::Error> = Ok(());
//! // Nothing is written because there is no error.
//! entry::on_error(result.err()).error("write failed");
//!
//! entry::log("LOG-7fQ2a")
//!     .with_fields(fields!["user", "alice", "attempt", 2])
//!     .info("signed in");
//! ```

use std::{error::Error, fmt, panic::Location, process};

use time::OffsetDateTime;

use crate::{
    attr::{to_fields, Attr, Value},
    caller::{CallerResolver, StackTrace},
    context::Context,
    keys,
    level::Level,
    logger::{default_logger, Logger},
    record::Record,
};

/// Collects attributes for a single record and dispatches it at a chosen level.
///
/// Every record carries its `caller`; records at trace, debug, error, fatal and panic level also
/// carry a `stack_trace` starting at the caller. The record goes to the logger set with [`Entry::with_logger`], else to the logger of the
/// context set with [`Entry::with_context`], else to the default logger.
#[derive(Clone, Debug, Default)]
pub struct Entry {
    attrs: Vec<Attr>,
    is_on_error: bool,
    has_error: bool,
    time: Option<OffsetDateTime>,
    context: Option<Context>,
    logger: Option<Logger>,
}

macro_rules! level_methods {
    ($($level:expr => $plain:ident, $formatted:ident, $listed:ident;)*) => {
        $(
            #[doc = concat!("Logs `message` at `", stringify!($level), "`.")]
            #[track_caller]
            pub fn $plain(self, message: impl Into<String>) {
                self.dispatch($level, message.into(), Vec::new());
            }

            #[doc = concat!("Logs a formatted message at `", stringify!($level), "`.")]
            #[track_caller]
            pub fn $formatted(self, args: fmt::Arguments<'_>) {
                self.dispatch($level, args.to_string(), Vec::new());
            }

            #[doc = concat!(
                "Logs at `", stringify!($level), "` with the first element as the message and ",
                "the rest as alternating keys and values."
            )]
            #[track_caller]
            pub fn $listed(self, args: Vec<Value>) {
                let (message, attrs) = split_message(args);
                self.dispatch($level, message, attrs);
            }
        )*
    };
}

impl Entry {
    /// Creates an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entry carrying the log identifier `id` under `logID`.
    pub fn log(id: impl Into<String>) -> Self {
        Self::new().with_attrs(vec![Attr::string(keys::LOG_ID, id)])
    }

    /// Makes the entry conditional on `error`.
    ///
    /// With `None` every subsequent log call on this entry is a no-op; with `Some` the error is
    /// attached as `err`.
    #[must_use]
    pub fn on_error<E>(self, error: Option<E>) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let mut entry = match error {
            Some(error) => self.with_error(error),
            None => self,
        };
        entry.is_on_error = true;
        entry
    }

    /// Attaches `error` as `err` unless the entry already carries one.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        self.has_error = true;
        if self.attrs.iter().any(|attr| attr.key() == keys::ERR) {
            return self;
        }
        self.attrs.push(Attr::error(keys::ERR, error));
        self
    }

    /// Adds attributes from alternating keys and values, see [`to_fields`].
    #[must_use]
    pub fn with_fields(self, fields: Vec<Value>) -> Self {
        self.with_attrs(to_fields(fields))
    }

    /// Adds a single attribute.
    #[must_use]
    pub fn with_field(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_attrs(vec![Attr::new(key, value)])
    }

    /// Adds attributes.
    #[must_use]
    pub fn with_attrs(mut self, attrs: Vec<Attr>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    /// Overrides the record time.
    #[must_use]
    pub fn with_time(mut self, time: OffsetDateTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the call context of the record.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Sends the record to `logger`.
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    level_methods! {
        Level::TRACE => trace, tracef, traceln;
        Level::DEBUG => debug, debugf, debugln;
        Level::INFO => info, infof, infoln;
        Level::WARN => warn, warnf, warnln;
        Level::ERROR => error, errorf, errorln;
    }

    /// Logs `message` at `Level::FATAL` and exits the process with status 1.
    ///
    /// Does nothing if the entry was made conditional on an absent error.
    #[track_caller]
    pub fn fatal(self, message: impl Into<String>) {
        self.fatal_with(message.into(), Vec::new());
    }

    /// Logs a formatted message at `Level::FATAL` and exits the process with status 1.
    #[track_caller]
    pub fn fatalf(self, args: fmt::Arguments<'_>) {
        self.fatal_with(args.to_string(), Vec::new());
    }

    /// Like [`Entry::fatal`], taking the message and alternating keys and values.
    #[track_caller]
    pub fn fatalln(self, args: Vec<Value>) {
        let (message, attrs) = split_message(args);
        self.fatal_with(message, attrs);
    }

    /// Logs `message` at `Level::PANIC` and panics with it.
    ///
    /// # Panics
    ///
    /// Always, unless the entry was made conditional on an absent error.
    #[track_caller]
    pub fn panic(self, message: impl Into<String>) {
        self.panic_with(message.into(), Vec::new());
    }

    /// Logs a formatted message at `Level::PANIC` and panics with it.
    ///
    /// # Panics
    ///
    /// Always, unless the entry was made conditional on an absent error.
    #[track_caller]
    pub fn panicf(self, args: fmt::Arguments<'_>) {
        self.panic_with(args.to_string(), Vec::new());
    }

    /// Like [`Entry::panic`], taking the message and alternating keys and values.
    ///
    /// # Panics
    ///
    /// Always, unless the entry was made conditional on an absent error.
    #[track_caller]
    pub fn panicln(self, args: Vec<Value>) {
        let (message, attrs) = split_message(args);
        self.panic_with(message, attrs);
    }

    fn is_suppressed(&self) -> bool {
        self.is_on_error && !self.has_error
    }

    #[track_caller]
    fn fatal_with(self, message: String, attrs: Vec<Attr>) {
        if self.is_suppressed() {
            return;
        }
        self.with_error(message.clone())
            .dispatch(Level::FATAL, message, attrs);
        process::exit(1);
    }

    #[allow(clippy::panic)]
    #[track_caller]
    fn panic_with(self, message: String, attrs: Vec<Attr>) {
        if self.is_suppressed() {
            return;
        }
        self.with_error(message.clone())
            .dispatch(Level::PANIC, message.clone(), attrs);
        panic!("{message}");
    }

    #[track_caller]
    fn dispatch(self, level: Level, message: String, attrs: Vec<Attr>) {
        if self.is_suppressed() {
            return;
        }
        let location = Location::caller();
        let context = self.context.unwrap_or_default();
        let logger = self
            .logger
            .or_else(|| context.logger().cloned())
            .unwrap_or_else(default_logger);
        if !logger.enabled(level) {
            return;
        }

        let mut record = Record::new(level, message)
            .with_context(context)
            .with_attrs(self.attrs)
            .with_attrs(attrs)
            .with_attrs(caller_attrs(level, location));
        if let Some(time) = self.time {
            record = record.with_time(time);
        }
        let _ = logger.log_record(&record);
    }
}

fn carries_stack(level: Level) -> bool {
    level <= Level::DEBUG || level >= Level::ERROR
}

/// The `caller` of a record and, at the levels that carry one, its `stack_trace`.
///
/// Falls back to the tracked call site when the stack walk finds no frame outside the library.
fn caller_attrs(level: Level, location: &Location<'_>) -> Vec<Attr> {
    let resolver = CallerResolver::default();
    let caller = resolver.locate();
    let mut attrs = vec![Attr::string(
        keys::CALLER,
        caller.as_ref().map_or_else(
            || format!("{}:{}", location.file(), location.line()),
            ToString::to_string,
        ),
    )];
    if carries_stack(level) {
        let stack = caller.map_or(StackTrace::Unavailable, |caller| {
            resolver.stack_from(caller.anchor())
        });
        attrs.push(Attr::string(keys::STACK_TRACE, stack.render()));
    }
    attrs
}

/// Splits a message-first argument list.
///
/// A message that is not a string is rendered and described under `nonstringloggingkey`.
fn split_message(args: Vec<Value>) -> (String, Vec<Attr>) {
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        return (String::new(), Vec::new());
    };
    let mut attrs = to_fields(args);
    let message = match first {
        Value::String(message) => message,
        other => {
            let message = other.to_string();
            attrs.push(Attr::string(
                keys::NON_STRING_MESSAGE,
                format!("{message} of type {}", other.kind()),
            ));
            message
        }
    };
    (message, attrs)
}

/// Creates an empty entry.
pub fn new() -> Entry {
    Entry::new()
}

/// Creates an entry carrying the log identifier `id`, see [`Entry::log`].
pub fn log(id: impl Into<String>) -> Entry {
    Entry::log(id)
}

/// Creates an entry conditional on `error`, see [`Entry::on_error`].
pub fn on_error<E>(error: Option<E>) -> Entry
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    Entry::new().on_error(error)
}

/// Creates an entry carrying `error`, see [`Entry::with_error`].
pub fn with_error(error: impl Into<Box<dyn Error + Send + Sync>>) -> Entry {
    Entry::new().with_error(error)
}

/// Creates an entry with attributes from alternating keys and values.
pub fn with_fields(fields: Vec<Value>) -> Entry {
    Entry::new().with_fields(fields)
}

macro_rules! level_functions {
    ($($plain:ident, $formatted:ident, $listed:ident;)*) => {
        $(
            #[doc = concat!("Shortcut for [`Entry::", stringify!($plain), "`] on a new entry.")]
            #[track_caller]
            pub fn $plain(message: impl Into<String>) {
                Entry::new().$plain(message);
            }

            #[doc = concat!("Shortcut for [`Entry::", stringify!($formatted), "`] on a new entry.")]
            #[track_caller]
            pub fn $formatted(args: fmt::Arguments<'_>) {
                Entry::new().$formatted(args);
            }

            #[doc = concat!("Shortcut for [`Entry::", stringify!($listed), "`] on a new entry.")]
            #[track_caller]
            pub fn $listed(args: Vec<Value>) {
                Entry::new().$listed(args);
            }
        )*
    };
}

level_functions! {
    trace, tracef, traceln;
    debug, debugf, debugln;
    info, infof, infoln;
    warn, warnf, warnln;
    error, errorf, errorln;
}
