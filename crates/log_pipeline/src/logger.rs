//! The [`Logger`] front end and the process-wide default logger.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;

use crate::{
    attr::Attr,
    context::Context,
    handler::{context_data::ContextDataHandler, text::TextHandler, Handler, HandlerOptions},
    level::Level,
    record::Record,
    LoggerError,
};

static DEFAULT: LazyLock<ArcSwap<Logger>> = LazyLock::new(|| {
    ArcSwap::from_pointee(Logger::new(Arc::new(TextHandler::new(
        std::io::stderr,
        HandlerOptions::default(),
    ))))
});

/// Returns the process-wide default logger.
///
/// Until [`set_default`] is called this is a [`TextHandler`] writing records at
/// [`Level::INFO`] and above to standard error.
pub fn default_logger() -> Logger {
    Logger::clone(&DEFAULT.load())
}

/// Replaces the process-wide default logger. Readers never block.
pub fn set_default(logger: Logger) {
    DEFAULT.store(Arc::new(logger));
}

/// Creates records and hands them to a handler chain.
///
/// Loggers are cheap to clone; derived loggers share the downstream chain.
#[derive(Clone, Debug)]
pub struct Logger {
    handler: Arc<dyn Handler>,
}

impl Logger {
    /// Creates a logger dispatching to `handler`.
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler }
    }

    /// The outermost handler of the chain.
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Whether records of `level` would be handled.
    pub fn enabled(&self, level: Level) -> bool {
        self.handler.enabled(level)
    }

    /// Returns a logger adding `attrs` to every record.
    #[must_use]
    pub fn with(&self, attrs: Vec<Attr>) -> Self {
        Self::new(self.handler.with_attrs(attrs))
    }

    /// Returns a logger nesting all subsequent attributes under `name`.
    #[must_use]
    pub fn with_group(&self, name: &str) -> Self {
        Self::new(self.handler.with_group(name))
    }

    /// Returns a logger writing the context data of each record under `group`.
    #[must_use]
    pub fn with_context_data(&self, group: impl Into<String>) -> Self {
        Self::new(Arc::new(ContextDataHandler::new(
            Arc::clone(&self.handler),
            group,
        )))
    }

    /// Logs `message` at `level` with `attrs`.
    ///
    /// Failures to encode or write the record are discarded.
    #[track_caller]
    pub fn log(&self, ctx: &Context, level: Level, message: impl Into<String>, attrs: Vec<Attr>) {
        if !self.enabled(level) {
            return;
        }
        let record = Record::new(level, message)
            .with_context(ctx.clone())
            .with_attrs(attrs);
        let _ = self.handler.handle(&record);
    }

    /// Hands a prepared record to the chain if its level is enabled.
    pub fn log_record(&self, record: &Record) -> Result<(), LoggerError> {
        if !self.enabled(record.level()) {
            return Ok(());
        }
        self.handler.handle(record)
    }

    /// Logs at [`Level::TRACE`].
    #[track_caller]
    pub fn trace(&self, ctx: &Context, message: impl Into<String>, attrs: Vec<Attr>) {
        self.log(ctx, Level::TRACE, message, attrs);
    }

    /// Logs at [`Level::DEBUG`].
    #[track_caller]
    pub fn debug(&self, ctx: &Context, message: impl Into<String>, attrs: Vec<Attr>) {
        self.log(ctx, Level::DEBUG, message, attrs);
    }

    /// Logs at [`Level::INFO`].
    #[track_caller]
    pub fn info(&self, ctx: &Context, message: impl Into<String>, attrs: Vec<Attr>) {
        self.log(ctx, Level::INFO, message, attrs);
    }

    /// Logs at [`Level::WARN`].
    #[track_caller]
    pub fn warn(&self, ctx: &Context, message: impl Into<String>, attrs: Vec<Attr>) {
        self.log(ctx, Level::WARN, message, attrs);
    }

    /// Logs at [`Level::ERROR`].
    #[track_caller]
    pub fn error(&self, ctx: &Context, message: impl Into<String>, attrs: Vec<Attr>) {
        self.log(ctx, Level::ERROR, message, attrs);
    }
}

/// The logger attached to `ctx`, or the default logger.
pub fn from_context(ctx: &Context) -> Logger {
    ctx.logger().cloned().unwrap_or_else(default_logger)
}
