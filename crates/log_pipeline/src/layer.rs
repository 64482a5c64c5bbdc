//! Provides a [`tracing_subscriber::Layer`] ([`HandlerLayer`]) that forwards `tracing` events
//! into a [`Logger`].
//!
//! Span fields are kept as [`ContextData`] in the span's extensions. A new span starts from a
//! clone of its parent's data, so values recorded on a child never leak into the parent or its
//! siblings. Events are logged with the data of their span as the record context.

use std::{cell::Cell, error::Error, fmt};

use tracing::{
    field::{Field, Visit},
    span::{Attributes, Id, Record as SpanRecord},
    Event, Subscriber,
};
use tracing_subscriber::{layer::Context as LayerContext, registry::LookupSpan, Layer};

use crate::{
    attr::{Attr, Value},
    context::{Context, ContextData},
    keys,
    level::Level,
    logger::Logger,
    record::Record,
    LoggerError,
};

/// The `tracing` field holding the message of an event.
const MESSAGE_FIELD: &str = "message";

thread_local! {
    /// Set while a failed record is being reported, so the report cannot fail recursively.
    static REPORTING_FAILURE: Cell<bool> = const { Cell::new(false) };
}

/// A [`tracing_subscriber::Layer`] that turns `tracing` events into records of a [`Logger`].
#[derive(Clone, Debug)]
pub struct HandlerLayer {
    logger: Logger,
}

impl HandlerLayer {
    /// Creates a layer logging to `logger`.
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

/// Span data stored in the span's extensions.
#[derive(Clone, Debug, Default)]
struct SpanData(ContextData);

/// Key-value data recorded for a span or an event.
#[derive(Debug, Default)]
struct Fields {
    message: Option<String>,
    values: Vec<(String, Value)>,
}

impl Fields {
    /// Records a key-value pair.
    ///
    /// Keys the encoders write themselves are skipped with a warning.
    fn record_value(&mut self, key: &str, value: Value) {
        if keys::RESERVED_KEYS.contains(key) {
            tracing::warn!("Attempting to record a reserved key `{key}` (value: {value:?}). Skipping.");
        } else {
            self.values.push((key.to_string(), value));
        }
    }

    fn record_message(&mut self, field: &Field, value: impl FnOnce() -> String) -> bool {
        if field.name() != MESSAGE_FIELD {
            return false;
        }
        if self.message.is_none() {
            self.message = Some(value());
        }
        true
    }
}

impl Visit for Fields {
    fn record_f64(&mut self, field: &Field, value: f64) {
        if !self.record_message(field, || value.to_string()) {
            self.record_value(field.name(), Value::Float(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if !self.record_message(field, || value.to_string()) {
            self.record_value(field.name(), Value::Int(value));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if !self.record_message(field, || value.to_string()) {
            self.record_value(field.name(), Value::Uint(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if !self.record_message(field, || value.to_string()) {
            self.record_value(field.name(), Value::Bool(value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == MESSAGE_FIELD {
            // `record_str()` is preferred for `message`
            self.message = Some(value.to_string());
        } else {
            self.record_value(field.name(), Value::from(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if !self.record_message(field, || value.to_string()) {
            self.record_value(field.name(), Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.record_message(field, || format!("{value:?}")) {
            return;
        }
        match field.name() {
            name if name.starts_with("log.") => (),
            name => {
                let name = name.strip_prefix("r#").unwrap_or(name);
                self.record_value(name, Value::String(format!("{value:?}")));
            }
        }
    }
}

impl<S> Layer<S> for HandlerLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: LayerContext<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        // Inherit data from the parent span if it exists.
        let mut data = span
            .parent()
            .and_then(|parent| parent.extensions().get::<SpanData>().cloned())
            .unwrap_or_default();

        let mut fields = Fields::default();
        attrs.record(&mut fields);
        for (key, value) in fields.values {
            data.0.insert(key, value);
        }
        span.extensions_mut().insert(data);
    }

    fn on_record(&self, id: &Id, values: &SpanRecord<'_>, ctx: LayerContext<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut fields = Fields::default();
        values.record(&mut fields);

        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanData>() {
            Some(data) => {
                for (key, value) in fields.values {
                    data.0.insert(key, value);
                }
            }
            None => {
                extensions.insert(SpanData(fields.values.into_iter().collect()));
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let level = Level::from(*event.metadata().level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut fields = Fields::default();
        event.record(&mut fields);

        let mut context = Context::new();
        if let Some(data) = ctx
            .event_span(event)
            .and_then(|span| span.extensions().get::<SpanData>().cloned())
        {
            context = context.with_data(data.0);
        }

        let record = Record::new(level, fields.message.unwrap_or_default())
            .with_source(None)
            .with_context(context)
            .with_attrs(
                fields
                    .values
                    .into_iter()
                    .map(|(key, value)| Attr::new(key, value)),
            );
        if let Err(error) = self.logger.log_record(&record) {
            report_failure(&error);
        }
    }
}

/// Emits a `tracing` event about a record that could not be written.
///
/// The event reaches the other layers of the subscriber; this layer drops it.
fn report_failure(error: &LoggerError) {
    if REPORTING_FAILURE.with(Cell::get) {
        return;
    }
    REPORTING_FAILURE.with(|reporting| reporting.set(true));
    tracing::error!(error = %error, "Failed to forward an event to the logger");
    REPORTING_FAILURE.with(|reporting| reporting.set(false));
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::{
        handler::{json::JsonHandler, Chain, HandlerOptions},
        writer::SharedBuffer,
    };

    fn records(buffer: &SharedBuffer) -> Vec<serde_json::Value> {
        let bytes = buffer.contents();
        serde_json::Deserializer::from_slice(&bytes)
            .into_iter::<serde_json::Value>()
            .map(|value| {
                let mut value = value.expect("invalid JSON line");
                if let Some(object) = value.as_object_mut() {
                    object.remove("time");
                }
                value
            })
            .collect()
    }

    #[test]
    fn events_carry_span_data_as_context() {
        let buffer = SharedBuffer::new();
        let logger = Chain::new(JsonHandler::new(
            buffer.clone(),
            HandlerOptions::default(),
        ))
        .context_data("ctx")
        .into_logger();
        let subscriber = tracing_subscriber::registry().with(HandlerLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            let parent = tracing::info_span!("request", id = "req-1", user = "alice");
            let _parent = parent.enter();
            {
                let child = tracing::info_span!("query", user = "bob", rows = 3_u64);
                let _child = child.enter();
                tracing::warn!(table = "projects", "slow query");
            }
            tracing::info!("done");
            tracing::debug!("filtered out");
        });

        assert_eq!(
            records(&buffer),
            vec![
                json!({
                    "level": "WARN",
                    "msg": "slow query",
                    "table": "projects",
                    "ctx": {"id": "req-1", "rows": 3, "user": "bob"},
                }),
                json!({
                    "level": "INFO",
                    "msg": "done",
                    "ctx": {"id": "req-1", "user": "alice"},
                }),
            ]
        );
    }

    #[test]
    fn recorded_span_values_are_merged() {
        let buffer = SharedBuffer::new();
        let logger = Chain::new(JsonHandler::new(
            buffer.clone(),
            HandlerOptions::default(),
        ))
        .context_data("")
        .into_logger();
        let subscriber = tracing_subscriber::registry().with(HandlerLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("job", status = tracing::field::Empty);
            span.record("status", "running");
            let _span = span.enter();
            tracing::error!(attempt = 2_i64, "failed");
        });

        assert_eq!(
            records(&buffer),
            vec![json!({"level": "ERROR", "msg": "failed", "attempt": 2, "status": "running"})]
        );
    }
}
