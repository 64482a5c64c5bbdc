//! Encodes records as Zitadel access records.

use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing_subscriber::fmt::MakeWriter;

use self::record::{AccessRecord, RecordV1};
pub use self::record::{Severity, ServiceInfo};
use super::{write_line, Handler, HandlerOptions, Scope};
use crate::{
    attr::{Attr, Value},
    caller::CallerResolver,
    keys,
    level::Level,
    payload::{Exception, Payload},
    record::Record,
    LoggerError,
};

pub mod record;

/// How an access record is wrapped before it is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Envelope {
    /// `{"record_v1": {...}}`.
    #[default]
    RecordV1,
    /// The access record itself.
    Bare,
}

/// The process identifier used when none is configured: `<hostname>-<pid>`.
pub fn default_process() -> String {
    format!(
        "{}-{}",
        gethostname::gethostname().to_string_lossy(),
        std::process::id()
    )
}

/// Terminal handler writing each record as one Zitadel access record per line.
///
/// Attributes carrying a [`Payload`] fill the matching sub-message of the record; all other
/// attributes, together with the static dynamic fields, end up in the `dynamic` map. At
/// [`Level::ERROR`] an `err` or `error` attribute becomes the `exception` unless an exception
/// payload is present. Records at [`Level::ERROR`] and above, and records at exactly
/// [`Level::TRACE`], carry a stack trace.
pub struct ZitadelHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    dst_writer: Arc<W>,
    options: HandlerOptions,
    envelope: Envelope,
    service: Option<ServiceInfo>,
    dynamic: Arc<BTreeMap<String, serde_json::Value>>,
    resolver: CallerResolver,
    scope: Scope,
}

impl<W> ZitadelHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    /// Creates a handler writing to `dst_writer`.
    ///
    /// The service context is omitted when `service` is entirely empty.
    pub fn new(
        dst_writer: W,
        options: HandlerOptions,
        service: ServiceInfo,
        dynamic: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            dst_writer: Arc::new(dst_writer),
            options,
            envelope: Envelope::default(),
            service: (!service.is_empty()).then_some(service),
            dynamic: Arc::new(dynamic),
            resolver: CallerResolver::default(),
            scope: Scope::default(),
        }
    }

    /// Creates a handler from static formatter data.
    ///
    /// `service`, `version` and `process` describe the service (`process` defaults to
    /// [`default_process`]); every other key becomes a static dynamic field.
    pub fn from_data(
        dst_writer: W,
        options: HandlerOptions,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let field = |key: &str| {
            data.get(key)
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string)
        };
        let service = ServiceInfo {
            service: field(keys::SERVICE).unwrap_or_default(),
            version: field(keys::VERSION).unwrap_or_default(),
            process: field(keys::PROCESS).unwrap_or_else(default_process),
        };
        let dynamic = data
            .iter()
            .filter(|(key, _)| !keys::SERVICE_CONTEXT_KEYS.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self::new(dst_writer, options, service, dynamic)
    }

    /// Sets the envelope.
    #[must_use]
    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Sets the resolver used to build stack traces.
    #[must_use]
    pub fn with_resolver(mut self, resolver: CallerResolver) -> Self {
        self.resolver = resolver;
        self
    }

    fn derive(&self, scope: Scope) -> Self {
        Self {
            dst_writer: Arc::clone(&self.dst_writer),
            options: self.options.clone(),
            envelope: self.envelope,
            service: self.service.clone(),
            dynamic: Arc::clone(&self.dynamic),
            resolver: self.resolver,
            scope,
        }
    }

    fn dynamic_value(value: &Value) -> serde_json::Value {
        serde_json::to_value(value).unwrap_or_else(|error| {
            serde_json::Value::String(format!(
                "failed to convert a value of kind {} to JSON: {error}",
                value.kind()
            ))
        })
    }

    fn classify(record: &mut AccessRecord, attr: Attr, is_error: bool) {
        let (key, value) = attr.into_parts();
        let value = value.resolve().into_owned();
        match value {
            Value::Payload(Payload::Exception(exception)) => record.exception = Some(exception),
            Value::Payload(Payload::Api(api)) => record.api = Some(api),
            Value::Payload(Payload::User(user)) => record.user = Some(user),
            Value::Payload(Payload::Http(http)) => record.http = Some(http),
            value if is_error && (key == keys::ERR || key == keys::ERROR) => {
                if record.exception.is_none() {
                    record.exception = Some(Exception::from_cause(value.to_string()));
                }
            }
            value => {
                record.dynamic.insert(key, Self::dynamic_value(&value));
            }
        }
    }

    fn to_access_record(&self, record: &Record) -> AccessRecord {
        let level = record.level();
        let mut access_record = AccessRecord::new(record.time(), level, record.message());
        access_record.service = self.service.clone();

        if let Some(trace) = record.context().trace() {
            access_record.trace_id = trace.trace_id();
            access_record.span_id = trace.span_id();
        }

        access_record.dynamic = self.dynamic.as_ref().clone();

        if level >= Level::ERROR || level == Level::TRACE {
            access_record.stack_trace = self.resolver.capture().into_frames();
        }

        // The structured stack above replaces any rendered one added by earlier stages.
        let attrs: Vec<Attr> = record
            .attrs()
            .iter()
            .filter(|attr| attr.key() != keys::STACK_TRACE)
            .cloned()
            .collect();
        let is_error = level >= Level::ERROR;
        for attr in self.scope.collect(&attrs) {
            Self::classify(&mut access_record, attr, is_error);
        }
        access_record
    }
}

impl<W> fmt::Debug for ZitadelHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZitadelHandler")
            .field("options", &self.options)
            .field("envelope", &self.envelope)
            .field("service", &self.service)
            .field("dynamic", &self.dynamic)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<W> Handler for ZitadelHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fn enabled(&self, level: Level) -> bool {
        level >= self.options.level
    }

    fn handle(&self, record: &Record) -> Result<(), LoggerError> {
        let access_record = self.to_access_record(record);
        let buffer = match self.envelope {
            Envelope::RecordV1 => serde_json::to_vec(&RecordV1 {
                record_v1: &access_record,
            })?,
            Envelope::Bare => serde_json::to_vec(&access_record)?,
        };
        write_line(&*self.dst_writer, buffer)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Handler> {
        Arc::new(self.derive(self.scope.with_attrs(attrs)))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        Arc::new(self.derive(self.scope.with_group(name)))
    }
}
