//! tower layers logging HTTP traffic.
//!
//! - [`RequestLoggingLayer`] wraps a server-side service. It stores a [`Context`][crate::Context]
//!   carrying request-scoped data and logger in the request extensions and logs one record per
//!   served request.
//! - [`ClientLoggingLayer`] wraps an HTTP client service and logs one record per roundtrip, using
//!   the logger of the [`Context`][crate::Context] found in the outgoing request's extensions.

use http::{Method, Uri};

use crate::attr::{Attr, LogValue, Value};

pub mod client;
pub mod middleware;

pub use self::{
    client::{ClientLogging, ClientLoggingLayer},
    middleware::{LoggedBody, RequestLogging, RequestLoggingLayer},
};

/// Method and URL of a request, rendered only when a record is written.
#[derive(Clone, Debug)]
pub(crate) struct RequestData {
    method: Method,
    uri: Uri,
}

impl RequestData {
    pub(crate) fn new(method: &Method, uri: &Uri) -> Self {
        Self {
            method: method.clone(),
            uri: uri.clone(),
        }
    }
}

impl LogValue for RequestData {
    fn log_value(&self) -> Value {
        Value::Group(vec![
            Attr::string("method", self.method.as_str()),
            Attr::string("url", self.uri.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_data_renders_method_and_url() {
        let uri: Uri = "https://example.com/path/?q=1".parse().expect("invalid URI");
        let data = RequestData::new(&Method::POST, &uri);
        assert_eq!(
            data.log_value(),
            Value::Group(vec![
                Attr::string("method", "POST"),
                Attr::string("url", "https://example.com/path/?q=1"),
            ])
        );
    }
}
