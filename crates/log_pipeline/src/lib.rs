//! `log_pipeline` provides structured logging through composable handler chains.
//!
//! It offers:
//! - An attribute model ([`Attr`], [`Value`]) with groups and deferred values.
//! - A call [`Context`] carrying request-scoped [`ContextData`], a request-scoped [`Logger`] and
//!   trace identifiers.
//! - The [`Handler`] contract and its stages: [`CallerHandler`], [`ContextDataHandler`],
//!   [`CloudLoggingHandler`], assembled with the ordered [`Chain`] builder.
//! - Terminal encoders: [`JsonHandler`], [`TextHandler`] and [`ZitadelHandler`].
//! - A fluent [`Entry`] API dispatching to the process-wide default [`Logger`].
//! - A [`Config`] that builds a ready-to-use logger, and a [`HandlerLayer`] forwarding `tracing`
//!   events into a logger.
//! - With the `http` feature, tower layers for server-side request logging and client-side
//!   roundtrip logging.
//!
//! # Example
//!
//! ```
//! use log_pipeline::{Attr, Chain, Context, ContextData, HandlerOptions, JsonHandler, SharedBuffer};
//!
//! let buffer = SharedBuffer::new();
//! let logger = Chain::new(JsonHandler::new(buffer.clone(), HandlerOptions::default()))
//!     .context_data("ctx")
//!     .into_logger();
//!
//! let ctx = Context::new().with_data(ContextData::new("req-1"));
//! logger
//!     .with_group("project")
//!     .log(&ctx, log_pipeline::Level::INFO, "created", vec![Attr::string("name", "demo")]);
//! ```

pub mod attr;
pub mod caller;
pub mod clock;
pub mod config;
pub mod context;
pub mod entry;
pub mod handler;
#[cfg(feature = "http")]
pub mod http;
pub mod layer;
pub mod level;
pub mod logger;
pub mod payload;
pub mod record;
pub mod writer;

pub use self::{
    attr::{to_fields, Attr, LogValue, Value},
    caller::{CallerResolver, StackTrace},
    clock::{Clock, MockClock, SystemClock},
    config::{Config, Format, LoggingComponents},
    context::{Context, ContextData, TraceContext},
    entry::Entry,
    handler::{
        cloud::{CloudLoggingHandler, ServiceContext},
        context_data::ContextDataHandler,
        json::JsonHandler,
        stack::CallerHandler,
        text::TextHandler,
        zitadel::ZitadelHandler,
        Chain, Handler, HandlerOptions, ReplaceAttr,
    },
    layer::HandlerLayer,
    level::Level,
    logger::{default_logger, set_default, Logger},
    record::Record,
    writer::SharedBuffer,
};

pub(crate) mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const MESSAGE: &str = "msg";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const TIME: &str = "time";
    pub(crate) const SOURCE: &str = "source";
    pub(crate) const FILE: &str = "file";
    pub(crate) const LINE: &str = "line";
    pub(crate) const CALLER: &str = "caller";
    pub(crate) const STACK_TRACE: &str = "stack_trace";
    pub(crate) const ERR: &str = "err";
    pub(crate) const ERROR: &str = "error";
    pub(crate) const LOG_ID: &str = "logID";
    pub(crate) const ODD_FIELDS: &str = "oddFields";
    pub(crate) const NON_STRING_MESSAGE: &str = "nonstringloggingkey";
    pub(crate) const CALLER_FRAME: &str = "stack_handler_internal_caller_frame";

    pub(crate) const SEVERITY: &str = "severity";
    pub(crate) const CLOUD_MESSAGE: &str = "message";
    pub(crate) const TYPE: &str = "@type";
    pub(crate) const APP_CONTEXT: &str = "app_context";
    pub(crate) const SERVICE_CONTEXT: &str = "service_context";

    pub(crate) const SERVICE: &str = "service";
    pub(crate) const VERSION: &str = "version";
    pub(crate) const PROCESS: &str = "process";

    /// Keys written by the encoders themselves.
    pub(crate) static RESERVED_KEYS: LazyLock<FxHashSet<&'static str>> =
        LazyLock::new(|| [MESSAGE, LEVEL, TIME, SOURCE].iter().copied().collect());

    /// Keys of the static formatter data that describe the emitting service rather than
    /// being copied into every record.
    pub(crate) static SERVICE_CONTEXT_KEYS: LazyLock<FxHashSet<&'static str>> =
        LazyLock::new(|| [SERVICE, VERSION, PROCESS].iter().copied().collect());
}

/// Errors that can occur within the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// Represents an error while writing a record to its sink.
    #[error("Failed to write log record: {0}")]
    Write(#[from] std::io::Error),

    /// Represents an error during initialization of the rolling file appender.
    #[error("Failed to initialize rolling file appender: {0}")]
    FileAppenderInitialization(#[from] tracing_appender::rolling::InitError),

    /// Represents an error due to an invalid filtering directive.
    #[error("Failed to parse filtering directive: {0}")]
    InvalidFilteringDirective(#[from] tracing_subscriber::filter::ParseError),
}
