//! Reshapes records for Google Cloud Logging.
//!
//! The stage keeps `time`, `severity`, `message`, `@type`, `caller`, `stack_trace` and
//! `service_context` at the top level and nests every other attribute under `app_context`. The
//! renaming of `level`/`msg` to `severity`/`message` happens in the JSON encoder through
//! [`replace_attr`].

use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;

use super::{json::JsonHandler, Handler, HandlerOptions, ReplaceAttr, Scope};
use crate::{
    attr::{Attr, Value},
    keys,
    level::Level,
    record::Record,
    LoggerError,
};

/// `@type` of records that Cloud Error Reporting picks up.
pub const ERROR_REPORTING_TYPE: &str =
    "type.googleapis.com/google.devtools.clouderrorreporting.v1beta1.ReportedErrorEvent";

/// The service reported in `service_context`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceContext {
    /// Name of the service.
    pub service: Option<String>,
    /// Version of the service.
    pub version: Option<String>,
}

impl ServiceContext {
    /// Creates a service context; empty strings count as unset.
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        let non_empty = |value: String| (!value.is_empty()).then_some(value);
        Self {
            service: non_empty(service.into()),
            version: non_empty(version.into()),
        }
    }

    /// Reads `service` and `version` from static formatter data.
    ///
    /// Returns `None` when neither is set.
    pub fn from_data(data: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let field = |key: &str| {
            data.get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let context = Self::new(field(keys::SERVICE), field(keys::VERSION));
        (context.service.is_some() || context.version.is_some()).then_some(context)
    }

    fn to_attr(&self) -> Option<Attr> {
        let members: Vec<Attr> = [
            (keys::SERVICE, &self.service),
            (keys::VERSION, &self.version),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|value| Attr::string(key, value)))
        .collect();
        (!members.is_empty()).then(|| Attr::group(keys::SERVICE_CONTEXT, members))
    }
}

/// Maps a level to the Cloud Logging severity vocabulary.
pub fn severity(level: Level) -> &'static str {
    if level < Level::INFO {
        "DEBUG"
    } else if level < Level::WARN {
        "INFO"
    } else if level < Level::ERROR {
        "WARNING"
    } else if level < Level::FATAL {
        "ERROR"
    } else if level < Level::PANIC {
        "CRITICAL"
    } else {
        "ALERT"
    }
}

/// Parses the rendered `level` field back into a level, e.g. `INFO+2` into `INFO`.
fn parse_rendered_level(value: &Value) -> Option<Level> {
    let rendered = value.to_string();
    let name = rendered.split(['+', '-']).next().unwrap_or_default();
    match name.parse::<Level>() {
        Ok(base) => {
            let offset = rendered
                .get(name.len()..)
                .filter(|offset| !offset.is_empty())
                .and_then(|offset| offset.parse::<i32>().ok())
                .unwrap_or_default();
            Some(Level::new(base.value() + offset))
        }
        Err(_) => None,
    }
}

/// Returns the replacement hook a [`JsonHandler`] needs to produce Cloud Logging records.
///
/// Renames the top-level `level` to `severity` (mapped with [`severity`]) and `msg` to
/// `message`, then runs `after` on the result.
pub fn replace_attr(after: Option<ReplaceAttr>) -> ReplaceAttr {
    Arc::new(move |groups: &[String], attr: Attr| {
        let attr = if groups.is_empty() {
            match attr.key() {
                keys::LEVEL => {
                    let severity = parse_rendered_level(attr.value()).map_or("DEFAULT", severity);
                    Attr::string(keys::SEVERITY, severity)
                }
                keys::MESSAGE => {
                    let (_, value) = attr.into_parts();
                    Attr::new(keys::CLOUD_MESSAGE, value)
                }
                _ => attr,
            }
        } else {
            attr
        };
        match &after {
            Some(after) => after(groups, attr),
            None => Some(attr),
        }
    })
}

/// Creates a Cloud Logging stage in front of a JSON handler writing to `dst_writer`.
///
/// Any replacement hook in `options` runs after the Cloud Logging renames.
pub fn handler<W>(
    dst_writer: W,
    mut options: HandlerOptions,
    service: Option<ServiceContext>,
) -> CloudLoggingHandler
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    options.replace_attr = Some(replace_attr(options.replace_attr.take()));
    CloudLoggingHandler::new(Arc::new(JsonHandler::new(dst_writer, options)), service)
}

/// The Cloud Logging stage.
///
/// Attributes added through [`Handler::with_attrs`] and [`Handler::with_group`] are kept by this
/// stage so that they end up in `app_context` like the per-call attributes.
#[derive(Clone, Debug)]
pub struct CloudLoggingHandler {
    wrapped: Arc<dyn Handler>,
    service_context: Option<Attr>,
    scope: Scope,
}

impl CloudLoggingHandler {
    /// Wraps `wrapped`, reporting `service` in every record.
    pub fn new(wrapped: Arc<dyn Handler>, service: Option<ServiceContext>) -> Self {
        Self {
            wrapped,
            service_context: service.as_ref().and_then(ServiceContext::to_attr),
            scope: Scope::default(),
        }
    }

    fn derive(&self, scope: Scope) -> Self {
        Self {
            wrapped: Arc::clone(&self.wrapped),
            service_context: self.service_context.clone(),
            scope,
        }
    }

    fn is_error_key(key: &str) -> bool {
        key == keys::ERR || key == keys::ERROR
    }
}

impl Handler for CloudLoggingHandler {
    fn enabled(&self, level: Level) -> bool {
        self.wrapped.enabled(level)
    }

    fn handle(&self, record: &Record) -> Result<(), LoggerError> {
        let is_error = record.level() >= Level::ERROR;
        let original_message = record.message();
        let mut message = original_message.to_string();

        let mut top_level = Vec::with_capacity(4);
        if let Some(service_context) = &self.service_context {
            top_level.push(service_context.clone());
        }
        if is_error {
            top_level.push(Attr::string(keys::TYPE, ERROR_REPORTING_TYPE));
        }

        // Errors are folded into the message wherever they were added.
        let (scope, mut errors) = if is_error {
            self.scope
                .extract(&|attr: &Attr| Self::is_error_key(attr.key()))
        } else {
            (self.scope.clone(), Vec::new())
        };

        let mut remaining = Vec::with_capacity(record.attrs().len());
        for attr in record.attrs() {
            match attr.key() {
                keys::CALLER => top_level.push(attr.clone()),
                keys::STACK_TRACE => top_level.push(Attr::string(
                    keys::STACK_TRACE,
                    format!("{original_message}\n{}", attr.value()),
                )),
                key if is_error && Self::is_error_key(key) => errors.push(attr.clone()),
                _ => remaining.push(attr.clone()),
            }
        }
        for error in &errors {
            message = format!("{message}: {}", error.value());
        }

        let app_context = scope.collect(&remaining);
        if !app_context.is_empty() {
            top_level.push(Attr::group(keys::APP_CONTEXT, app_context));
        }

        self.wrapped
            .handle(&record.with_replaced_attrs(top_level).with_message(message))
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Handler> {
        Arc::new(self.derive(self.scope.with_attrs(attrs)))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        Arc::new(self.derive(self.scope.with_group(name)))
    }
}
