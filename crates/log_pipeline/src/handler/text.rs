//! Human-readable `key=value` output.

use std::{fmt, fmt::Write as _, sync::Arc};

use tracing_subscriber::fmt::MakeWriter;

use super::{write_line, Handler, HandlerOptions, Scope};
use crate::{
    attr::Attr,
    keys,
    level::Level,
    record::Record,
    LoggerError,
};

/// Writes every record as a line of space-separated `key=value` pairs.
///
/// Members of groups are written with dotted keys (`group.key=value`). Values that are empty or
/// contain whitespace, `=` or `"` are quoted.
pub struct TextHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    dst_writer: Arc<W>,
    options: HandlerOptions,
    scope: Scope,
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '=' || c == '"')
}

fn push_text(line: &mut String, text: &str) {
    if needs_quoting(text) {
        let _ = write!(line, "{text:?}");
    } else {
        line.push_str(text);
    }
}

impl<W> TextHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    /// Creates a text handler writing to `dst_writer`.
    pub fn new(dst_writer: W, options: HandlerOptions) -> Self {
        Self {
            dst_writer: Arc::new(dst_writer),
            options,
            scope: Scope::default(),
        }
    }

    fn derive(&self, scope: Scope) -> Self {
        Self {
            dst_writer: Arc::clone(&self.dst_writer),
            options: self.options.clone(),
            scope,
        }
    }

    fn push_attr(&self, line: &mut String, groups: &mut Vec<String>, attr: &Attr) {
        let value = attr.value().resolve();
        if let Some(members) = value.as_group() {
            if attr.key().is_empty() {
                for member in members.iter() {
                    self.push_attr(line, groups, member);
                }
            } else {
                groups.push(attr.key().to_string());
                for member in members.iter() {
                    self.push_attr(line, groups, member);
                }
                groups.pop();
            }
            return;
        }

        let resolved = Attr::new(attr.key(), value.into_owned());
        let Some(attr) = self.options.replace(groups, resolved) else {
            return;
        };
        if !line.is_empty() {
            line.push(' ');
        }
        let key = if groups.is_empty() {
            attr.key().to_string()
        } else {
            format!("{}.{}", groups.join("."), attr.key())
        };
        push_text(line, &key);
        line.push('=');
        push_text(line, &attr.value().to_string());
    }

    fn format_record(&self, record: &Record) -> String {
        let mut line = String::new();
        let mut groups = Vec::new();

        self.push_attr(&mut line, &mut groups, &Attr::new(keys::TIME, record.time()));
        self.push_attr(
            &mut line,
            &mut groups,
            &Attr::new(keys::LEVEL, record.level().to_string()),
        );
        if self.options.add_source {
            if let Some(source) = record.source() {
                self.push_attr(
                    &mut line,
                    &mut groups,
                    &Attr::new(keys::SOURCE, format!("{}:{}", source.file(), source.line())),
                );
            }
        }
        self.push_attr(
            &mut line,
            &mut groups,
            &Attr::new(keys::MESSAGE, record.message()),
        );

        for attr in self.scope.collect(record.attrs()) {
            self.push_attr(&mut line, &mut groups, &attr);
        }
        line
    }
}

impl<W> fmt::Debug for TextHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextHandler")
            .field("options", &self.options)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<W> Handler for TextHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fn enabled(&self, level: Level) -> bool {
        level >= self.options.level
    }

    fn handle(&self, record: &Record) -> Result<(), LoggerError> {
        write_line(&*self.dst_writer, self.format_record(record).into_bytes())
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
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::writer::SharedBuffer;

    fn line(buffer: &SharedBuffer) -> String {
        String::from_utf8(buffer.contents())
            .expect("output is not UTF-8")
    }

    #[test]
    fn flattens_groups_into_dotted_keys() {
        let buffer = SharedBuffer::new();
        let handler = TextHandler::new(buffer.clone(), HandlerOptions::default())
            .with_group("request")
            .with_attrs(vec![Attr::string("method", "GET")]);

        let record = Record::new(Level::WARN, "slow request")
            .with_time(datetime!(2024-01-02 03:04:05 UTC))
            .with_attrs([
                Attr::duration("took", Duration::from_millis(1500)),
                Attr::string("note", ""),
                Attr::string("query", "a=b"),
            ]);
        handler.handle(&record).expect("handle failed");

        assert_eq!(
            line(&buffer),
            "time=2024-01-02T03:04:05Z level=WARN msg=\"slow request\" request.method=GET \
             request.took=1.5s request.note=\"\" request.query=\"a=b\"\n"
        );
    }

    #[test]
    fn inlines_groups_without_key() {
        let buffer = SharedBuffer::new();
        let options = HandlerOptions::default().with_replace_attr(Arc::new(
            |groups: &[String], attr: Attr| {
                if groups.is_empty() && attr.key() == "time" {
                    None
                } else {
                    Some(attr)
                }
            },
        ));
        let handler = TextHandler::new(buffer.clone(), options);

        let record = Record::new(Level::INFO, "ok")
            .with_attrs([Attr::group("", [Attr::int("a", 1), Attr::bool("b", true)])]);
        handler.handle(&record).expect("handle failed");

        assert_eq!(line(&buffer), "level=INFO msg=ok a=1 b=true\n");
    }
}
