//! Adds the caller location and, for errors, a stack trace.

use std::sync::Arc;

use super::Handler;
use crate::{
    attr::Attr,
    caller::{CallerResolver, FrameAnchor, StackTrace},
    keys,
    level::Level,
    record::Record,
    LoggerError,
};

/// Adds a `caller` attribute (`file:line` of the first frame outside the library) to every
/// record, and a `stack_trace` attribute starting at that frame to records at [`Level::ERROR`]
/// or above. Records that already carry a `caller` pass unchanged.
#[derive(Clone, Debug)]
pub struct CallerHandler {
    wrapped: Arc<dyn Handler>,
    resolver: CallerResolver,
}

impl CallerHandler {
    /// Wraps `wrapped` using the default resolver.
    pub fn new(wrapped: Arc<dyn Handler>) -> Self {
        Self::with_resolver(wrapped, CallerResolver::default())
    }

    /// Wraps `wrapped` using `resolver` to find the caller.
    pub fn with_resolver(wrapped: Arc<dyn Handler>, resolver: CallerResolver) -> Self {
        Self { wrapped, resolver }
    }

    /// Appends the caller and an internal marker identifying its frame.
    fn with_caller(&self, record: &Record) -> Record {
        let Some(caller) = self.resolver.locate() else {
            return record.clone();
        };
        record.clone().with_attrs([
            Attr::string(keys::CALLER, caller.to_string()),
            Attr::new(keys::CALLER_FRAME, caller.anchor().to_value()),
        ])
    }

    /// Removes the marker and, if requested, builds the stack trace from the marked frame.
    fn strip_caller_marker(&self, record: &Record, add_stack: bool) -> Record {
        let mut anchor = None;
        let mut attrs: Vec<Attr> = record
            .attrs()
            .iter()
            .filter(|attr| {
                if attr.key() == keys::CALLER_FRAME {
                    anchor = FrameAnchor::from_value(attr.value());
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        if add_stack {
            let stack = anchor.map_or(StackTrace::Unavailable, |anchor| {
                self.resolver.stack_from(anchor)
            });
            attrs.push(Attr::string(keys::STACK_TRACE, stack.render()));
        }
        record.with_replaced_attrs(attrs)
    }
}

impl Handler for CallerHandler {
    fn enabled(&self, level: Level) -> bool {
        self.wrapped.enabled(level)
    }

    fn handle(&self, record: &Record) -> Result<(), LoggerError> {
        if record.attrs().iter().any(|attr| attr.key() == keys::CALLER) {
            return self.wrapped.handle(record);
        }
        let record = self.with_caller(record);
        let record = self.strip_caller_marker(&record, record.level() >= Level::ERROR);
        self.wrapped.handle(&record)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Handler> {
        Arc::new(Self {
            wrapped: self.wrapped.with_attrs(attrs),
            resolver: self.resolver,
        })
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        Arc::new(Self {
            wrapped: self.wrapped.with_group(name),
            resolver: self.resolver,
        })
    }
}
