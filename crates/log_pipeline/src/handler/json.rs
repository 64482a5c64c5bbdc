//! The plain JSON encoder.

use std::{fmt, sync::Arc};

use serde::ser::{SerializeMap, Serializer};
use serde_json::ser::{CompactFormatter, Formatter};
use tracing_subscriber::fmt::MakeWriter;

use super::{write_line, Handler, HandlerOptions, Scope};
use crate::{
    attr::{Attr, AttrMap, Value},
    keys,
    level::Level,
    record::Record,
    LoggerError,
};

/// Writes every record as one JSON object per line.
///
/// The object starts with `time`, `level`, optionally `source` and `msg`, followed by the
/// attributes. Groups become nested objects, empty groups are omitted and groups with an empty
/// key are inlined. The [`serde_json::ser::Formatter`] controls the output style (compact or
/// pretty-printed).
pub struct JsonHandler<W, F = CompactFormatter>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    F: Formatter + Clone + Send + Sync + 'static,
{
    dst_writer: Arc<W>,
    formatter: F,
    options: HandlerOptions,
    scope: Scope,
}

impl<W> JsonHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    /// Creates a compact JSON handler writing to `dst_writer`.
    pub fn new(dst_writer: W, options: HandlerOptions) -> Self {
        Self::with_formatter(dst_writer, CompactFormatter, options)
    }
}

impl<W, F> JsonHandler<W, F>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    F: Formatter + Clone + Send + Sync + 'static,
{
    /// Creates a JSON handler using `formatter` for the output style.
    pub fn with_formatter(dst_writer: W, formatter: F, options: HandlerOptions) -> Self {
        Self {
            dst_writer: Arc::new(dst_writer),
            formatter,
            options,
            scope: Scope::default(),
        }
    }

    fn derive(&self, scope: Scope) -> Self {
        Self {
            dst_writer: Arc::clone(&self.dst_writer),
            formatter: self.formatter.clone(),
            options: self.options.clone(),
            scope,
        }
    }

    /// Serializes a built-in top-level field after passing it through the replacement hook.
    fn serialize_builtin<M>(&self, map_serializer: &mut M, attr: Attr) -> Result<(), M::Error>
    where
        M: SerializeMap,
    {
        match self.options.replace(&[], attr) {
            Some(attr) => map_serializer.serialize_entry(attr.key(), attr.value()),
            None => Ok(()),
        }
    }

    fn serialize_record(&self, record: &Record) -> Result<Vec<u8>, LoggerError> {
        let attrs = self.scope.collect(record.attrs());

        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, self.formatter.clone());
        let mut map_serializer = serializer.serialize_map(None)?;

        self.serialize_builtin(&mut map_serializer, Attr::new(keys::TIME, record.time()))?;
        self.serialize_builtin(
            &mut map_serializer,
            Attr::new(keys::LEVEL, record.level().to_string()),
        )?;
        if self.options.add_source {
            if let Some(source) = record.source() {
                self.serialize_builtin(
                    &mut map_serializer,
                    Attr::new(
                        keys::SOURCE,
                        Value::Group(vec![
                            Attr::new(keys::FILE, source.file()),
                            Attr::new(keys::LINE, source.line()),
                        ]),
                    ),
                )?;
            }
        }
        self.serialize_builtin(
            &mut map_serializer,
            Attr::new(keys::MESSAGE, record.message()),
        )?;

        AttrMap::with_replace(&attrs, Vec::new(), self.options.replace_attr.as_ref())
            .serialize_entries(&mut map_serializer)?;

        map_serializer.end()?;
        Ok(buffer)
    }
}

impl<W, F> Clone for JsonHandler<W, F>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    F: Formatter + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        self.derive(self.scope.clone())
    }
}

impl<W, F> fmt::Debug for JsonHandler<W, F>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    F: Formatter + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonHandler")
            .field("options", &self.options)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<W, F> Handler for JsonHandler<W, F>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    F: Formatter + Clone + Send + Sync + 'static,
{
    fn enabled(&self, level: Level) -> bool {
        level >= self.options.level
    }

    fn handle(&self, record: &Record) -> Result<(), LoggerError> {
        let buffer = self.serialize_record(record)?;
        write_line(&*self.dst_writer, buffer)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Handler> {
        Arc::new(self.derive(self.scope.with_attrs(attrs)))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        Arc::new(self.derive(self.scope.with_group(name)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::writer::SharedBuffer;

    fn output(buffer: &SharedBuffer) -> serde_json::Value {
        let bytes = buffer.contents();
        serde_json::from_slice(&bytes).expect("output is not a single JSON object")
    }

    fn record(message: &str) -> Record {
        Record::new(Level::INFO, message).with_time(datetime!(2024-01-02 03:04:05 UTC))
    }

    #[test]
    fn writes_builtins_then_attributes() {
        let buffer = SharedBuffer::new();
        let handler = JsonHandler::new(buffer.clone(), HandlerOptions::default())
            .with_attrs(vec![Attr::string("service", "api")])
            .with_group("request")
            .with_attrs(vec![Attr::string("method", "GET")]);

        handler
            .handle(&record("served").with_attrs([Attr::int("status", 200)]))
            .expect("handle failed");

        assert_eq!(
            output(&buffer),
            json!({
                "time": "2024-01-02T03:04:05Z",
                "level": "INFO",
                "msg": "served",
                "service": "api",
                "request": {"method": "GET", "status": 200},
            })
        );
        assert!(buffer.contents().ends_with(b"}\n"));
    }

    #[test]
    fn replace_hook_sees_group_paths_and_can_drop() {
        let buffer = SharedBuffer::new();
        let options =
            HandlerOptions::default().with_replace_attr(Arc::new(|groups: &[String], attr: Attr| {
                if attr.key() == "time" {
                    return None;
                }
                if groups == ["outer"] && attr.key() == "secret" {
                    return Some(Attr::string("secret", "***"));
                }
                Some(attr)
            }));
        let handler = JsonHandler::new(buffer.clone(), options);

        handler
            .handle(&record("hidden").with_attrs([Attr::group(
                "outer",
                [Attr::string("secret", "hunter2")],
            )]))
            .expect("handle failed");

        assert_eq!(
            output(&buffer),
            json!({"level": "INFO", "msg": "hidden", "outer": {"secret": "***"}})
        );
    }

    #[test]
    fn source_is_written_when_enabled() {
        let buffer = SharedBuffer::new();
        let handler =
            JsonHandler::new(buffer.clone(), HandlerOptions::default().with_source(true));
        handler.handle(&record("here")).expect("handle failed");

        let source = &output(&buffer)["source"];
        assert_eq!(source["file"], json!(file!()));
        assert!(source["line"].is_u64());
    }

    #[test]
    fn enabled_respects_the_minimum_level() {
        let handler = JsonHandler::new(
            std::io::sink,
            HandlerOptions::default().with_level(Level::WARN),
        );
        assert!(!handler.enabled(Level::INFO));
        assert!(handler.enabled(Level::ERROR));
    }
}
