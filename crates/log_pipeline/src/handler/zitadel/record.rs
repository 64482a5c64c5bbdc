//! The Zitadel access record (version 1) in its canonical protobuf JSON form.

use std::collections::BTreeMap;

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    level::Level,
    payload::{ApiContext, Exception, HttpRequest, UserContext},
};

/// Severity of an access record.
///
/// Only exactly matching levels map to a severity; every other level is undefined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// The level has no counterpart.
    #[default]
    SeverityUndefined,
    /// Exactly [`Level::TRACE`].
    Trace,
    /// Exactly [`Level::DEBUG`].
    Debug,
    /// Exactly [`Level::INFO`].
    Info,
    /// Exactly [`Level::WARN`].
    Warn,
    /// Exactly [`Level::ERROR`].
    Error,
}

impl Severity {
    #[allow(clippy::trivially_copy_pass_by_ref)]
    fn is_undefined(&self) -> bool {
        *self == Self::SeverityUndefined
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE => Self::Trace,
            Level::DEBUG => Self::Debug,
            Level::INFO => Self::Info,
            Level::WARN => Self::Warn,
            Level::ERROR => Self::Error,
            _ => Self::SeverityUndefined,
        }
    }
}

/// The emitting service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Process instance, e.g. a pod name.
    pub process: String,
}

impl ServiceInfo {
    pub(crate) fn is_empty(&self) -> bool {
        self.service.is_empty() && self.version.is_empty() && self.process.is_empty()
    }
}

/// One access record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccessRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) time: OffsetDateTime,
    #[serde(skip_serializing_if = "Severity::is_undefined")]
    pub(crate) severity: Severity,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) service: Option<ServiceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) span_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) stack_trace: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) exception: Option<Exception>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) api: Option<ApiContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) user: Option<UserContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) http: Option<HttpRequest>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) dynamic: BTreeMap<String, serde_json::Value>,
}

impl AccessRecord {
    pub(crate) fn new(time: OffsetDateTime, level: Level, message: &str) -> Self {
        Self {
            time: time.to_offset(time::UtcOffset::UTC),
            severity: level.into(),
            message: message.to_string(),
            service: None,
            trace_id: None,
            span_id: None,
            stack_trace: Vec::new(),
            exception: None,
            api: None,
            user: None,
            http: None,
            dynamic: BTreeMap::new(),
        }
    }
}

/// Wraps an access record in the versioned stream envelope.
#[derive(Debug, Serialize)]
pub(crate) struct RecordV1<'a> {
    pub(crate) record_v1: &'a AccessRecord,
}
