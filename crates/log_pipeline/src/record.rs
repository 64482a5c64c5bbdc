//! A single log event.

use std::panic::Location;

use time::OffsetDateTime;

use crate::{attr::Attr, context::Context, level::Level};

/// A log event as it travels through a handler chain.
///
/// Handlers receive records by reference and build new records when they need to change them.
#[derive(Clone, Debug)]
pub struct Record {
    time: OffsetDateTime,
    level: Level,
    message: String,
    source: Option<&'static Location<'static>>,
    context: Context,
    attrs: Vec<Attr>,
}

impl Record {
    /// Creates a record stamped with the current time and the location of the caller.
    #[track_caller]
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: OffsetDateTime::now_utc(),
            level,
            message: message.into(),
            source: Some(Location::caller()),
            context: Context::default(),
            attrs: Vec::new(),
        }
    }

    /// Replaces the timestamp.
    #[must_use]
    pub fn with_time(mut self, time: OffsetDateTime) -> Self {
        self.time = time;
        self
    }

    /// Replaces the source location; `None` removes it.
    #[must_use]
    pub fn with_source(mut self, source: Option<&'static Location<'static>>) -> Self {
        self.source = source;
        self
    }

    /// Replaces the call context.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Appends attributes.
    #[must_use]
    pub fn with_attrs(mut self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    /// Returns a copy of this record carrying `attrs` instead of its own attributes.
    pub(crate) fn with_replaced_attrs(&self, attrs: Vec<Attr>) -> Self {
        Self {
            time: self.time,
            level: self.level,
            message: self.message.clone(),
            source: self.source,
            context: self.context.clone(),
            attrs,
        }
    }

    pub(crate) fn with_message(mut self, message: String) -> Self {
        self.message = message;
        self
    }

    /// When the record was created.
    pub fn time(&self) -> OffsetDateTime {
        self.time
    }

    /// Severity of the record.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The log message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Where the record was created.
    pub fn source(&self) -> Option<&'static Location<'static>> {
        self.source
    }

    /// The call context the record was logged with.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The per-call attributes, in insertion order.
    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }
}
