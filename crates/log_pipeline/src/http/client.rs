//! Client-side roundtrip logging.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use http::{header, request, response, Request, Response};
use http_body::Body;
use tower::{Layer, Service};

use crate::{
    attr::Attr,
    clock::{Clock, SystemClock},
    context::Context,
    logger::Logger,
};

/// Maps the outgoing request to the attribute describing it.
pub type RequestAttr = Arc<dyn Fn(&request::Parts) -> Attr + Send + Sync>;

/// Maps the received response, and the exact size of its body if known, to the attribute
/// describing it.
pub type ResponseAttr = Arc<dyn Fn(&response::Parts, Option<u64>) -> Attr + Send + Sync>;

/// The default request attribute: a `request` group with `method` and `url`.
pub fn request_attr(parts: &request::Parts) -> Attr {
    Attr::group(
        "request",
        [
            Attr::string("method", parts.method.as_str()),
            Attr::display("url", parts.uri.clone()),
        ],
    )
}

/// The default response attribute: a `response` group with `status` (e.g. `200 OK`) and
/// `content_length`, taken from the `Content-Length` header or the body size. An unknown length
/// is `-1`.
pub fn response_attr(parts: &response::Parts, body_size: Option<u64>) -> Attr {
    let content_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .or_else(|| body_size.and_then(|size| i64::try_from(size).ok()))
        .unwrap_or(-1);
    Attr::group(
        "response",
        [
            Attr::string("status", parts.status.to_string()),
            Attr::int("content_length", content_length),
        ],
    )
}

#[derive(Clone)]
struct Options {
    fallback: Option<Logger>,
    clock: Arc<dyn Clock>,
    request_attr: RequestAttr,
    response_attr: ResponseAttr,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("fallback", &self.fallback)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// A [`Layer`] logging `request roundtrip` for every request sent through the wrapped client.
///
/// The logger is taken from the [`Context`] in the request extensions, else the fallback logger
/// is used. Without either the request is sent without logging. The record carries the request
/// attribute and the `duration`, and either the response attribute at [`Level::INFO`] or the
/// `error` at [`Level::ERROR`].
///
/// [`Level::INFO`]: crate::Level::INFO
/// [`Level::ERROR`]: crate::Level::ERROR
#[derive(Clone, Debug)]
pub struct ClientLoggingLayer {
    options: Arc<Options>,
}

impl Default for ClientLoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientLoggingLayer {
    /// Creates a layer without fallback logger.
    pub fn new() -> Self {
        Self {
            options: Arc::new(Options {
                fallback: None,
                clock: Arc::new(SystemClock),
                request_attr: Arc::new(request_attr),
                response_attr: Arc::new(response_attr),
            }),
        }
    }

    fn update(mut self, update: impl FnOnce(&mut Options)) -> Self {
        update(Arc::make_mut(&mut self.options));
        self
    }

    /// Logs through `logger` when the request carries no context logger.
    #[must_use]
    pub fn with_fallback_logger(self, logger: Logger) -> Self {
        self.update(|options| options.fallback = Some(logger))
    }

    /// Measures durations with `clock`.
    #[must_use]
    pub fn with_clock(self, clock: impl Clock) -> Self {
        self.update(|options| options.clock = Arc::new(clock))
    }

    /// Replaces the request attribute mapper.
    #[must_use]
    pub fn with_request_attr(
        self,
        request_attr: impl Fn(&request::Parts) -> Attr + Send + Sync + 'static,
    ) -> Self {
        self.update(|options| options.request_attr = Arc::new(request_attr))
    }

    /// Replaces the response attribute mapper.
    #[must_use]
    pub fn with_response_attr(
        self,
        response_attr: impl Fn(&response::Parts, Option<u64>) -> Attr + Send + Sync + 'static,
    ) -> Self {
        self.update(|options| options.response_attr = Arc::new(response_attr))
    }
}

impl<S> Layer<S> for ClientLoggingLayer {
    type Service = ClientLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientLogging {
            inner,
            options: Arc::clone(&self.options),
        }
    }
}

/// The service created by [`ClientLoggingLayer`].
#[derive(Clone, Debug)]
pub struct ClientLogging<S> {
    inner: S,
    options: Arc<Options>,
}

impl<S> ClientLogging<S> {
    fn logger_for(&self, parts: &request::Parts) -> Option<(Logger, Context)> {
        match parts.extensions.get::<Context>() {
            Some(context) => match context.logger() {
                Some(logger) => Some((logger.clone(), context.clone())),
                None => self
                    .options
                    .fallback
                    .clone()
                    .map(|logger| (logger, context.clone())),
            },
            None => self
                .options
                .fallback
                .clone()
                .map(|logger| (logger, Context::new())),
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ClientLogging<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
    S::Future: Send + 'static,
    ResBody: Body,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let (parts, body) = request.into_parts();
        let Some((logger, context)) = self.logger_for(&parts) else {
            return Box::pin(self.inner.call(Request::from_parts(parts, body)));
        };

        let options = Arc::clone(&self.options);
        let request_attr = (options.request_attr)(&parts);
        let start = options.clock.now();
        let future = self.inner.call(Request::from_parts(parts, body));

        Box::pin(async move {
            let result = future.await;
            let logger = logger.with(vec![
                request_attr,
                Attr::duration("duration", options.clock.since(start)),
            ]);
            match result {
                Ok(response) => {
                    let body_size = response.body().size_hint().exact();
                    let (parts, body) = response.into_parts();
                    let response_attr = (options.response_attr)(&parts, body_size);
                    logger.info(&context, "request roundtrip", vec![response_attr]);
                    Ok(Response::from_parts(parts, body))
                }
                Err(error) => {
                    logger.error(
                        &context,
                        "request roundtrip",
                        vec![Attr::string("error", error.to_string())],
                    );
                    Err(error)
                }
            }
        })
    }
}
