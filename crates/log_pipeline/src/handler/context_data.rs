//! Writes the [`ContextData`] carried by a record's context.

use std::sync::Arc;

use super::Handler;
use crate::{
    attr::{Attr, LogValue, Value},
    context::ContextData,
    level::Level,
    record::Record,
    LoggerError,
};

/// Adds the context data of each record as one attribute under a configured group name.
///
/// The data is added through [`Handler::with_attrs`] on the wrapped handler, so it appears at the
/// nesting level of the logger and before the per-call attributes. An empty group name inlines
/// the fields.
#[derive(Clone, Debug)]
pub struct ContextDataHandler {
    handler: Arc<dyn Handler>,
    group_name: String,
}

impl ContextDataHandler {
    /// Wraps `handler`, writing context data under `group_name`.
    pub fn new(handler: Arc<dyn Handler>, group_name: impl Into<String>) -> Self {
        Self {
            handler,
            group_name: group_name.into(),
        }
    }

    /// The group the context data is written under.
    pub fn group_name(&self) -> &str {
        &self.group_name
    }
}

impl Handler for ContextDataHandler {
    fn enabled(&self, level: Level) -> bool {
        self.handler.enabled(level)
    }

    fn handle(&self, record: &Record) -> Result<(), LoggerError> {
        match record.context().shared_data() {
            Some(data) => {
                let data: Arc<dyn LogValue> = Arc::<ContextData>::clone(data);
                self.handler
                    .with_attrs(vec![Attr::new(self.group_name.as_str(), Value::Lazy(data))])
                    .handle(record)
            }
            None => self.handler.handle(record),
        }
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Handler> {
        Arc::new(Self {
            handler: self.handler.with_attrs(attrs),
            group_name: self.group_name.clone(),
        })
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        Arc::new(Self {
            handler: self.handler.with_group(name),
            group_name: self.group_name.clone(),
        })
    }
}
