//! Request-scoped data carried alongside a call.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    attr::{Attr, LogValue, Value},
    logger::Logger,
};

/// Key under which [`ContextData::new`] stores the identifier.
pub const CONTEXT_DATA_ID_KEY: &str = "id";

/// Arbitrary fields attached to a call [`Context`].
///
/// Rendered as an attribute group with members sorted by key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextData(BTreeMap<String, Value>);

impl ContextData {
    /// Creates a bag holding `id` under [`CONTEXT_DATA_ID_KEY`], or an empty bag if `id` is
    /// empty.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut data = Self::default();
        if !id.is_empty() {
            data.insert(CONTEXT_DATA_ID_KEY, id);
        }
        data
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`ContextData::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Copies all fields of `other` into `self`; fields of `other` win on duplicate keys.
    pub fn merge(&mut self, other: &Self) {
        self.0
            .extend(other.0.iter().map(|(key, value)| (key.clone(), value.clone())));
    }

    /// Iterates over the fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag holds no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The fields as attributes, sorted by key.
    pub fn to_attrs(&self) -> Vec<Attr> {
        self.0
            .iter()
            .map(|(key, value)| Attr::new(key.as_str(), value.clone()))
            .collect()
    }
}

impl LogValue for ContextData {
    fn log_value(&self) -> Value {
        Value::Group(self.to_attrs())
    }
}

impl<K, V> FromIterator<(K, V)> for ContextData
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Trace and span identifiers of the current operation.
///
/// All-zero identifiers are invalid and treated as absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: Option<[u8; 16]>,
    span_id: Option<[u8; 8]>,
}

impl TraceContext {
    /// Creates a trace context from raw identifiers.
    pub fn new(trace_id: [u8; 16], span_id: [u8; 8]) -> Self {
        Self {
            trace_id: (trace_id != [0; 16]).then_some(trace_id),
            span_id: (span_id != [0; 8]).then_some(span_id),
        }
    }

    /// The trace identifier as lowercase hex.
    pub fn trace_id(&self) -> Option<String> {
        self.trace_id.map(hex::encode)
    }

    /// The span identifier as lowercase hex.
    pub fn span_id(&self) -> Option<String> {
        self.span_id.map(hex::encode)
    }
}

#[cfg(feature = "opentelemetry")]
impl From<&opentelemetry::trace::SpanContext> for TraceContext {
    fn from(context: &opentelemetry::trace::SpanContext) -> Self {
        Self::new(context.trace_id().to_bytes(), context.span_id().to_bytes())
    }
}

/// The call context handed to a [`Logger`] with every record.
///
/// Contexts are values: every `with_*` method returns a new context and leaves `self` untouched,
/// so children never change what their ancestors observe.
#[derive(Clone, Debug, Default)]
pub struct Context {
    data: Option<Arc<ContextData>>,
    logger: Option<Logger>,
    trace: Option<TraceContext>,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The data attached to this context.
    pub fn data(&self) -> Option<&ContextData> {
        self.data.as_deref()
    }

    pub(crate) fn shared_data(&self) -> Option<&Arc<ContextData>> {
        self.data.as_ref()
    }

    /// Returns a context whose data is this context's data merged with `data`.
    ///
    /// Fields of `data` overwrite existing fields with the same key. If this context carries no
    /// data yet, `data` is attached as is.
    #[must_use]
    pub fn with_data(&self, data: ContextData) -> Self {
        let merged = match self.data.as_deref() {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge(&data);
                merged
            }
            None => data,
        };
        Self {
            data: Some(Arc::new(merged)),
            ..self.clone()
        }
    }

    /// The request-scoped logger, if one was attached.
    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_ref()
    }

    /// Returns a context carrying `logger`.
    #[must_use]
    pub fn with_logger(&self, logger: Logger) -> Self {
        Self {
            logger: Some(logger),
            ..self.clone()
        }
    }

    /// The trace identifiers, if any.
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Returns a context carrying `trace`.
    #[must_use]
    pub fn with_trace(&self, trace: TraceContext) -> Self {
        Self {
            trace: Some(trace),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_data_seeds_the_identifier() {
        assert_eq!(
            ContextData::new("123").get(CONTEXT_DATA_ID_KEY),
            Some(&Value::from("123"))
        );
        assert!(ContextData::new("").is_empty());
    }

    #[test]
    fn with_data_merges_and_overwrites() {
        let ctx = Context::new().with_data(ContextData::new("123").with("foo", "bar"));
        let child = ctx.with_data(ContextData::new("456").with("hello", "world"));

        let expected: ContextData = [("id", "456"), ("foo", "bar"), ("hello", "world")]
            .into_iter()
            .collect();
        assert_eq!(child.data(), Some(&expected));
    }

    #[test]
    fn derived_contexts_leave_ancestors_untouched() {
        let parent = Context::new().with_data(ContextData::new("123"));
        let _child = parent.with_data(ContextData::new("456").with("extra", 1));

        assert_eq!(parent.data(), Some(&ContextData::new("123")));

        let mut retrieved = parent.data().cloned().unwrap_or_default();
        retrieved.insert("mutated", true);
        assert_eq!(parent.data().map(ContextData::len), Some(1));
    }

    #[test]
    fn renders_as_group_sorted_by_key() {
        let data = ContextData::new("1").with("b", 2).with("a", 1);
        let keys: Vec<String> = match data.log_value() {
            Value::Group(attrs) => attrs.iter().map(|attr| attr.key().to_string()).collect(),
            other => panic!("expected group, got {other:?}"),
        };
        assert_eq!(keys, ["a", "b", "id"]);
    }

    #[test]
    fn zero_trace_identifiers_are_absent() {
        let trace = TraceContext::new([0; 16], [1; 8]);
        assert_eq!(trace.trace_id(), None);
        assert_eq!(trace.span_id().as_deref(), Some("0101010101010101"));
    }
}
