//! The handler contract, the per-handler attribute scope and the [`Chain`] builder.
//!
//! A handler either transforms a record and forwards it to the handler it wraps, or encodes it and
//! writes it to a sink. Handlers are immutable: [`Handler::with_attrs`] and
//! [`Handler::with_group`] return new handlers that share everything downstream but own their own
//! attribute scope, so loggers derived from a common ancestor never observe each other.

use std::{fmt, io::Write, sync::Arc};

use tracing_subscriber::fmt::MakeWriter;

use crate::{
    attr::Attr,
    caller::CallerResolver,
    level::Level,
    logger::Logger,
    record::Record,
    LoggerError,
};

pub mod cloud;
pub mod context_data;
pub mod json;
pub mod stack;
pub mod text;
pub mod zitadel;

/// Rewrites or drops an attribute before it is encoded.
///
/// Called with the keys of the groups enclosing the attribute (empty for top-level attributes,
/// including the built-in `time`, `level`, `source` and `msg`). Returning `None` drops the
/// attribute.
pub type ReplaceAttr = Arc<dyn Fn(&[String], Attr) -> Option<Attr> + Send + Sync>;

/// A stage of a handler chain.
pub trait Handler: Send + Sync + fmt::Debug {
    /// Whether a record of `level` would be handled. Has no side effects.
    fn enabled(&self, level: Level) -> bool;

    /// Processes a record.
    ///
    /// Encoding and write failures are returned, never retried.
    fn handle(&self, record: &Record) -> Result<(), LoggerError>;

    /// Returns a handler that adds `attrs` to every record, at the current group nesting.
    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Handler>;

    /// Returns a handler that nests all subsequent attributes under `name`.
    ///
    /// An empty name returns an equivalent handler.
    fn with_group(&self, name: &str) -> Arc<dyn Handler>;
}

/// Options shared by the encoding handlers.
#[derive(Clone)]
pub struct HandlerOptions {
    /// Records below this level are dropped.
    pub level: Level,
    /// Whether the `source` of the record is written.
    pub add_source: bool,
    /// Hook applied to every attribute before encoding.
    pub replace_attr: Option<ReplaceAttr>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            add_source: false,
            replace_attr: None,
        }
    }
}

impl fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerOptions")
            .field("level", &self.level)
            .field("add_source", &self.add_source)
            .field("replace_attr", &self.replace_attr.as_ref().map(|_| ".."))
            .finish()
    }
}

impl HandlerOptions {
    /// Sets the minimum level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Enables writing the source location.
    #[must_use]
    pub fn with_source(mut self, add_source: bool) -> Self {
        self.add_source = add_source;
        self
    }

    /// Sets the attribute replacement hook.
    #[must_use]
    pub fn with_replace_attr(mut self, replace_attr: ReplaceAttr) -> Self {
        self.replace_attr = Some(replace_attr);
        self
    }

    pub(crate) fn replace(&self, groups: &[String], attr: Attr) -> Option<Attr> {
        match &self.replace_attr {
            Some(replace) => replace(groups, attr),
            None => Some(attr),
        }
    }
}

/// The attributes and groups a handler accumulated through derivation.
///
/// `Unbound` holds nothing, `Flat` holds top-level attributes and `Grouped` opens a named group
/// inside its parent scope. Scopes are never modified in place: every derivation allocates a new
/// attribute slice.
#[derive(Clone, Debug, Default)]
pub(crate) enum Scope {
    #[default]
    Unbound,
    Flat {
        attrs: Arc<[Attr]>,
    },
    Grouped {
        name: String,
        attrs: Arc<[Attr]>,
        parent: Arc<Scope>,
    },
}

fn appended(existing: &[Attr], attrs: Vec<Attr>) -> Arc<[Attr]> {
    existing.iter().cloned().chain(attrs).collect()
}

impl Scope {
    pub(crate) fn with_attrs(&self, attrs: Vec<Attr>) -> Self {
        if attrs.is_empty() {
            return self.clone();
        }
        match self {
            Self::Unbound => Self::Flat {
                attrs: attrs.into(),
            },
            Self::Flat { attrs: existing } => Self::Flat {
                attrs: appended(existing, attrs),
            },
            Self::Grouped {
                name,
                attrs: existing,
                parent,
            } => Self::Grouped {
                name: name.clone(),
                attrs: appended(existing, attrs),
                parent: Arc::clone(parent),
            },
        }
    }

    pub(crate) fn with_group(&self, name: &str) -> Self {
        if name.is_empty() {
            return self.clone();
        }
        Self::Grouped {
            name: name.to_string(),
            attrs: Arc::from([]),
            parent: Arc::new(self.clone()),
        }
    }

    /// Removes the attributes matching `predicate` at every nesting level and returns them,
    /// outermost first.
    pub(crate) fn extract<P>(&self, predicate: &P) -> (Self, Vec<Attr>)
    where
        P: Fn(&Attr) -> bool,
    {
        match self {
            Self::Unbound => (Self::Unbound, Vec::new()),
            Self::Flat { attrs } => {
                let (taken, kept): (Vec<Attr>, Vec<Attr>) =
                    attrs.iter().cloned().partition(|attr| predicate(attr));
                (Self::Flat { attrs: kept.into() }, taken)
            }
            Self::Grouped {
                name,
                attrs,
                parent,
            } => {
                let (parent, mut taken) = parent.extract(predicate);
                let (inner, kept): (Vec<Attr>, Vec<Attr>) =
                    attrs.iter().cloned().partition(|attr| predicate(attr));
                taken.extend(inner);
                let scope = Self::Grouped {
                    name: name.clone(),
                    attrs: kept.into(),
                    parent: Arc::new(parent),
                };
                (scope, taken)
            }
        }
    }

    /// Places `record_attrs` into the innermost group and returns the complete top-level
    /// attribute list. Groups that end up empty are left out.
    pub(crate) fn collect(&self, record_attrs: &[Attr]) -> Vec<Attr> {
        match self {
            Self::Unbound => record_attrs.to_vec(),
            Self::Flat { attrs } => attrs.iter().chain(record_attrs).cloned().collect(),
            Self::Grouped {
                name,
                attrs,
                parent,
            } => {
                let members: Vec<Attr> = attrs.iter().chain(record_attrs).cloned().collect();
                if members.is_empty() {
                    parent.collect(&[])
                } else {
                    parent.collect(&[Attr::group(name.as_str(), members)])
                }
            }
        }
    }
}

/// Writes an encoded record followed by a newline with a single `write_all` call, so concurrent
/// records never interleave.
pub(crate) fn write_line<W>(dst_writer: &W, mut buffer: Vec<u8>) -> Result<(), LoggerError>
where
    W: for<'a> MakeWriter<'a>,
{
    buffer.push(b'\n');
    dst_writer.make_writer().write_all(&buffer)?;
    Ok(())
}

/// Assembles a handler chain around a terminal encoder.
///
/// Stages are always stacked in the same order regardless of the order of the builder calls:
/// the caller stage is outermost, followed by the context-data stage and the Cloud Logging stage,
/// and finally the terminal handler.
#[derive(Debug)]
pub struct Chain {
    terminal: Arc<dyn Handler>,
    cloud_logging: Option<Option<cloud::ServiceContext>>,
    context_group: Option<String>,
    caller: Option<CallerResolver>,
}

impl Chain {
    /// Starts a chain ending in `terminal`.
    pub fn new(terminal: impl Handler + 'static) -> Self {
        Self::from_handler(Arc::new(terminal))
    }

    /// Starts a chain ending in an already shared handler.
    pub fn from_handler(terminal: Arc<dyn Handler>) -> Self {
        Self {
            terminal,
            cloud_logging: None,
            context_group: None,
            caller: None,
        }
    }

    /// Adds the Cloud Logging stage. The terminal handler should be a [`json::JsonHandler`]
    /// using [`cloud::replace_attr`].
    #[must_use]
    pub fn cloud_logging(mut self, service: Option<cloud::ServiceContext>) -> Self {
        self.cloud_logging = Some(service);
        self
    }

    /// Adds the stage writing the [`ContextData`][crate::ContextData] of the record's context
    /// under `group`; an empty group inlines the fields.
    #[must_use]
    pub fn context_data(mut self, group: impl Into<String>) -> Self {
        self.context_group = Some(group.into());
        self
    }

    /// Adds the stage resolving the caller and, for errors, the stack trace.
    #[must_use]
    pub fn caller_and_stack(self) -> Self {
        self.caller_with(CallerResolver::default())
    }

    /// Like [`Chain::caller_and_stack`] with a custom resolver.
    #[must_use]
    pub fn caller_with(mut self, resolver: CallerResolver) -> Self {
        self.caller = Some(resolver);
        self
    }

    /// Returns the outermost handler.
    pub fn build(self) -> Arc<dyn Handler> {
        let mut handler = self.terminal;
        if let Some(service) = self.cloud_logging {
            handler = Arc::new(cloud::CloudLoggingHandler::new(handler, service));
        }
        if let Some(group) = self.context_group {
            handler = Arc::new(context_data::ContextDataHandler::new(handler, group));
        }
        if let Some(resolver) = self.caller {
            handler = Arc::new(stack::CallerHandler::with_resolver(handler, resolver));
        }
        handler
    }

    /// Builds the chain and wraps it in a [`Logger`].
    pub fn into_logger(self) -> Logger {
        Logger::new(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Value;

    fn keys(attrs: &[Attr]) -> Vec<&str> {
        attrs.iter().map(Attr::key).collect()
    }

    #[test]
    fn record_attrs_land_in_the_innermost_group() {
        let scope = Scope::default()
            .with_attrs(vec![Attr::int("top", 1)])
            .with_group("outer")
            .with_attrs(vec![Attr::int("a", 2)])
            .with_group("inner");

        let attrs = scope.collect(&[Attr::int("b", 3)]);
        assert_eq!(
            attrs,
            vec![
                Attr::int("top", 1),
                Attr::group(
                    "outer",
                    [Attr::int("a", 2), Attr::group("inner", [Attr::int("b", 3)])]
                ),
            ]
        );
    }

    #[test]
    fn empty_groups_are_elided() {
        let scope = Scope::default().with_group("outer").with_group("inner");
        assert!(scope.collect(&[]).is_empty());

        let scope = scope.with_group("");
        assert_eq!(keys(&scope.collect(&[Attr::bool("x", true)])), ["outer"]);
    }

    #[test]
    fn sibling_derivations_do_not_share_attributes() {
        let parent = Scope::default().with_attrs(vec![Attr::int("shared", 0)]);
        let left = parent.with_attrs(vec![Attr::int("left", 1)]);
        let right = parent.with_attrs(vec![Attr::int("right", 2)]);

        assert_eq!(keys(&parent.collect(&[])), ["shared"]);
        assert_eq!(keys(&left.collect(&[])), ["shared", "left"]);
        assert_eq!(keys(&right.collect(&[])), ["shared", "right"]);
    }

    #[test]
    fn extracted_attributes_leave_every_level() {
        let scope = Scope::default()
            .with_attrs(vec![Attr::string("err", "outer"), Attr::int("top", 1)])
            .with_group("job")
            .with_attrs(vec![Attr::string("err", "inner")]);

        let (rest, taken) = scope.extract(&|attr: &Attr| attr.key() == "err");
        assert_eq!(taken, [Attr::string("err", "outer"), Attr::string("err", "inner")]);
        assert_eq!(rest.collect(&[]), [Attr::int("top", 1)]);
        assert_eq!(keys(&scope.collect(&[])), ["err", "top", "job"]);
    }

    #[test]
    fn options_without_hook_keep_attributes() {
        let options = HandlerOptions::default();
        assert_eq!(
            options.replace(&[], Attr::new("k", "v")).map(|attr| attr.value().clone()),
            Some(Value::from("v"))
        );
    }
}
