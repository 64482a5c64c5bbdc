//! Typed key/value attributes attached to records.

use std::{borrow::Cow, error::Error, fmt, sync::Arc, time::Duration};

use serde::{
    ser::{Error as _, SerializeMap},
    Serialize, Serializer,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    handler::ReplaceAttr,
    keys,
    payload::{ApiContext, Exception, HttpRequest, Payload, UserContext},
};

/// Deferred values are resolved at most this many times in a row before giving up.
const MAX_RESOLVE_DEPTH: usize = 100;

/// A shared, thread-safe error value.
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Types that produce their log representation only when a record is actually written.
///
/// Values that are expensive to render (or that are only a view over other data, like
/// [`ContextData`][crate::ContextData]) implement this trait and are wrapped in
/// [`Value::Lazy`]; disabled records never pay for the rendering.
pub trait LogValue: Send + Sync {
    /// Renders the value.
    fn log_value(&self) -> Value;
}

/// Renders the wrapped [`fmt::Display`] type to a string at serialization time.
struct DisplayValue<T>(T);

impl<T> LogValue for DisplayValue<T>
where
    T: fmt::Display + Send + Sync,
{
    fn log_value(&self) -> Value {
        Value::String(self.0.to_string())
    }
}

/// The value of an [`Attr`].
#[derive(Clone)]
pub enum Value {
    /// A string.
    String(String),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// A floating point number.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A duration, encoded as nanoseconds in JSON output.
    Duration(Duration),
    /// A point in time, encoded as RFC 3339.
    Time(OffsetDateTime),
    /// An error, encoded as its display string.
    Error(SharedError),
    /// Arbitrary JSON-like structure.
    Json(serde_json::Value),
    /// An ordered group of attributes.
    Group(Vec<Attr>),
    /// A value rendered only when the record is written.
    Lazy(Arc<dyn LogValue>),
    /// A structured payload that dedicated encoders map to their own sub-messages.
    Payload(Payload),
}

impl Value {
    /// Creates a deferred value that renders `value` with its [`fmt::Display`] implementation
    /// only when the record is written.
    pub fn display<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Self::Lazy(Arc::new(DisplayValue(value)))
    }

    /// Creates a deferred value from a [`LogValue`].
    pub fn lazy<T>(value: T) -> Self
    where
        T: LogValue + 'static,
    {
        Self::Lazy(Arc::new(value))
    }

    /// Resolves deferred values until a concrete value is reached.
    pub fn resolve(&self) -> Cow<'_, Self> {
        let Self::Lazy(lazy) = self else {
            return Cow::Borrowed(self);
        };
        let mut value = lazy.log_value();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match value {
                Self::Lazy(lazy) => value = lazy.log_value(),
                resolved => return Cow::Owned(resolved),
            }
        }
        Cow::Owned(Self::String(
            "LogValue called too many times on Value of type Lazy".to_string(),
        ))
    }

    /// Returns the attributes of a group value, resolving deferred values first.
    pub fn as_group(&self) -> Option<Cow<'_, [Attr]>> {
        match self.resolve() {
            Cow::Borrowed(Self::Group(attrs)) => Some(Cow::Borrowed(attrs)),
            Cow::Owned(Self::Group(attrs)) => Some(Cow::Owned(attrs)),
            _ => None,
        }
    }

    /// A short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Duration(_) => "duration",
            Self::Time(_) => "time",
            Self::Error(_) => "error",
            Self::Json(_) => "json",
            Self::Group(_) => "group",
            Self::Lazy(_) => "lazy",
            Self::Payload(_) => "payload",
        }
    }

    pub(crate) fn into_key(self) -> String {
        match self {
            Self::String(key) => key,
            other => other.to_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.debug_tuple("String").field(value).finish(),
            Self::Int(value) => f.debug_tuple("Int").field(value).finish(),
            Self::Uint(value) => f.debug_tuple("Uint").field(value).finish(),
            Self::Float(value) => f.debug_tuple("Float").field(value).finish(),
            Self::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Self::Duration(value) => f.debug_tuple("Duration").field(value).finish(),
            Self::Time(value) => f.debug_tuple("Time").field(value).finish(),
            Self::Error(value) => f.debug_tuple("Error").field(&value.to_string()).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Group(value) => f.debug_tuple("Group").field(value).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
            Self::Payload(value) => f.debug_tuple("Payload").field(value).finish(),
        }
    }
}

impl PartialEq for Value {
    /// Deferred values compare by identity, errors by their message.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a.to_string() == b.to_string(),
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Group(a), Self::Group(b)) => a == b,
            (Self::Lazy(a), Self::Lazy(b)) => Arc::ptr_eq(a, b),
            (Self::Payload(a), Self::Payload(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Duration(value) => write!(f, "{value:?}"),
            Self::Time(value) => match value.format(&Rfc3339) {
                Ok(formatted) => f.write_str(&formatted),
                Err(_) => write!(f, "{value}"),
            },
            Self::Error(value) => write!(f, "{value}"),
            Self::Json(value) => write!(f, "{value}"),
            Self::Group(attrs) => {
                f.write_str("[")?;
                for (index, attr) in attrs.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}={}", attr.key, attr.value)?;
                }
                f.write_str("]")
            }
            Self::Lazy(_) => write!(f, "{}", self.resolve()),
            Self::Payload(payload) => match serde_json::to_string(payload) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{payload:?}"),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::String(value) => serializer.serialize_str(value),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Uint(value) => serializer.serialize_u64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Duration(value) => {
                serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
            }
            Self::Time(value) => {
                let formatted = value.format(&Rfc3339).map_err(S::Error::custom)?;
                serializer.serialize_str(&formatted)
            }
            Self::Error(value) => serializer.collect_str(value),
            Self::Json(value) => value.serialize(serializer),
            Self::Group(attrs) => AttrMap::new(attrs).serialize(serializer),
            Self::Lazy(_) => self.resolve().serialize(serializer),
            Self::Payload(payload) => payload.serialize(serializer),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    String => String,
    &str => String,
    i64 => Int,
    i32 => Int,
    i16 => Int,
    u64 => Uint,
    u32 => Uint,
    u16 => Uint,
    f64 => Float,
    f32 => Float,
    bool => Bool,
    Duration => Duration,
    OffsetDateTime => Time,
    serde_json::Value => Json,
    Vec<Attr> => Group,
    Payload => Payload,
    HttpRequest => Payload,
    UserContext => Payload,
    ApiContext => Payload,
    Exception => Payload,
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Uint(u64::try_from(value).unwrap_or(u64::MAX))
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<Box<dyn Error + Send + Sync>> for Value {
    fn from(value: Box<dyn Error + Send + Sync>) -> Self {
        Self::Error(value.into())
    }
}

impl From<SharedError> for Value {
    fn from(value: SharedError) -> Self {
        Self::Error(value)
    }
}

/// A key and a [`Value`].
#[derive(Clone, Debug, PartialEq)]
pub struct Attr {
    key: String,
    value: Value,
}

impl Attr {
    /// Creates an attribute from anything convertible into a [`Value`].
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a string attribute.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Value::String(value.into()))
    }

    /// Creates a signed integer attribute.
    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, Value::Int(value))
    }

    /// Creates a boolean attribute.
    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    /// Creates a duration attribute.
    pub fn duration(key: impl Into<String>, value: Duration) -> Self {
        Self::new(key, Value::Duration(value))
    }

    /// Creates an error attribute.
    pub fn error(key: impl Into<String>, error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        let error: Box<dyn Error + Send + Sync> = error.into();
        Self::new(key, Value::Error(error.into()))
    }

    /// Creates a group attribute. Groups with an empty key are inlined by the encoders.
    pub fn group(key: impl Into<String>, attrs: impl IntoIterator<Item = Self>) -> Self {
        Self::new(key, Value::Group(attrs.into_iter().collect()))
    }

    /// Creates an attribute whose string form is computed only when the record is written.
    pub fn display<T>(key: impl Into<String>, value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Self::new(key, Value::display(value))
    }

    /// Creates an attribute from a [`LogValue`].
    pub fn lazy<T>(key: impl Into<String>, value: T) -> Self
    where
        T: LogValue + 'static,
    {
        Self::new(key, Value::lazy(value))
    }

    /// The key of the attribute.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value of the attribute.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Splits the attribute into key and value.
    pub fn into_parts(self) -> (String, Value) {
        (self.key, self.value)
    }

    /// Returns a copy of the attribute with its value resolved.
    pub fn resolved(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.resolve().into_owned(),
        }
    }
}

/// Builds attributes from a flat list of alternating keys and values.
///
/// An odd number of arguments is a call-site mistake that must not crash the program: the call
/// then yields the single attribute `oddFields` holding the number of arguments. Keys that are
/// not strings are converted to their string form.
pub fn to_fields<I>(fields: I) -> Vec<Attr>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let fields: Vec<Value> = fields.into_iter().map(Into::into).collect();
    if fields.len() % 2 != 0 {
        return vec![Attr::new(keys::ODD_FIELDS, fields.len())];
    }

    let mut attrs = Vec::with_capacity(fields.len() / 2);
    let mut fields = fields.into_iter();
    while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
        attrs.push(Attr::new(key.into_key(), value));
    }
    attrs
}

/// Builds a `Vec<Value>` from heterogeneous arguments, for use with [`to_fields`] and the
/// [`Entry`][crate::Entry] methods taking flat key/value lists.
///
/// ```
/// let attrs = log_pipeline::to_fields(log_pipeline::fields!["user", "alice", "attempts", 3]);
/// assert_eq!(attrs.len(), 2);
/// ```
#[macro_export]
macro_rules! fields {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::Value::from($value)),*]
    };
}

/// Serializes a list of attributes as a map.
///
/// Deferred values are resolved, groups become nested maps, empty groups are dropped and groups
/// with an empty key are inlined into the enclosing map. If a [`ReplaceAttr`] hook is set it is
/// applied to every non-group attribute together with the path of enclosing group keys.
pub(crate) struct AttrMap<'a> {
    attrs: &'a [Attr],
    groups: Vec<String>,
    replace: Option<&'a ReplaceAttr>,
}

impl<'a> AttrMap<'a> {
    pub(crate) fn new(attrs: &'a [Attr]) -> Self {
        Self {
            attrs,
            groups: Vec::new(),
            replace: None,
        }
    }

    pub(crate) fn with_replace(
        attrs: &'a [Attr],
        groups: Vec<String>,
        replace: Option<&'a ReplaceAttr>,
    ) -> Self {
        Self {
            attrs,
            groups,
            replace,
        }
    }

    pub(crate) fn serialize_entries<M>(&self, map: &mut M) -> Result<(), M::Error>
    where
        M: SerializeMap,
    {
        for attr in self.attrs {
            let value = attr.value.resolve();
            if let Some(members) = value.as_group() {
                if members.is_empty() {
                    continue;
                }
                if attr.key.is_empty() {
                    AttrMap::with_replace(&members, self.groups.clone(), self.replace)
                        .serialize_entries(map)?;
                } else {
                    let mut groups = self.groups.clone();
                    groups.push(attr.key.clone());
                    map.serialize_entry(
                        &attr.key,
                        &AttrMap::with_replace(&members, groups, self.replace),
                    )?;
                }
                continue;
            }

            match self.replace {
                Some(replace) => {
                    let resolved = Attr {
                        key: attr.key.clone(),
                        value: value.into_owned(),
                    };
                    if let Some(replaced) = replace(&self.groups, resolved) {
                        map.serialize_entry(&replaced.key, &replaced.value)?;
                    }
                }
                None => map.serialize_entry(&attr.key, &*value)?,
            }
        }
        Ok(())
    }
}

impl Serialize for AttrMap<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        self.serialize_entries(&mut map)?;
        map.end()
    }
}
