//! Server-side request logging.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use bytes::Buf;
use http::{Request, Response};
use http_body::{Body, Frame, SizeHint};
use time::OffsetDateTime;
use tower::{Layer, Service};

use super::RequestData;
use crate::{
    attr::{Attr, Value},
    clock::{Clock, SystemClock},
    context::{Context, ContextData},
    logger::{default_logger, Logger},
};

/// Produces the identifier stored under `id` in the context data of each request.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

const DEFAULT_CONTEXT_GROUP: &str = "ctx";

#[derive(Clone)]
struct Options {
    logger: Option<Logger>,
    next_id: Option<IdGenerator>,
    clock: Arc<dyn Clock>,
    request_group: String,
    response_group: String,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("logger", &self.logger)
            .field("next_id", &self.next_id.as_ref().map(|_| "Fn() -> String"))
            .field("clock", &self.clock)
            .field("request_group", &self.request_group)
            .field("response_group", &self.response_group)
            .finish()
    }
}

/// A [`Layer`] logging one record per request served by the wrapped service.
///
/// Before the request reaches the inner service its extensions receive a [`Context`] whose
/// [`ContextData`] holds the request identifier and a `request` group with method and URL, and
/// whose logger is the logger of this layer. Services further down can log through that context.
///
/// The response body is wrapped in a [`LoggedBody`] counting the bytes sent. Once the body ended,
/// `request served` is logged at [`INFO`][crate::Level::INFO] with a `response` group holding
/// `status`, `written` and `duration`. If the inner service failed, or the body yielded an error
/// or was dropped before its end, `write response` is logged at [`WARN`][crate::Level::WARN]
/// with the `error`.
#[derive(Clone, Debug)]
pub struct RequestLoggingLayer {
    options: Arc<Options>,
}

impl Default for RequestLoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLoggingLayer {
    /// Creates a layer logging through the default logger with context data under `ctx`.
    pub fn new() -> Self {
        Self {
            options: Arc::new(Options {
                logger: None,
                next_id: None,
                clock: Arc::new(SystemClock),
                request_group: "request".to_string(),
                response_group: "response".to_string(),
            }),
        }
    }

    fn update(mut self, update: impl FnOnce(&mut Options)) -> Self {
        update(Arc::make_mut(&mut self.options));
        self
    }

    /// Logs through `logger`.
    #[must_use]
    pub fn with_logger(self, logger: Logger) -> Self {
        self.update(|options| options.logger = Some(logger))
    }

    /// Stores an identifier from `next_id` in the context data of each request.
    #[must_use]
    pub fn with_id(self, next_id: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.update(|options| options.next_id = Some(Arc::new(next_id)))
    }

    /// Measures durations with `clock`.
    #[must_use]
    pub fn with_clock(self, clock: impl Clock) -> Self {
        self.update(|options| options.clock = Arc::new(clock))
    }

    /// Renames the `request` and `response` groups.
    #[must_use]
    pub fn with_group_names(
        self,
        request: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        let (request, response) = (request.into(), response.into());
        self.update(|options| {
            options.request_group = request;
            options.response_group = response;
        })
    }
}

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogging {
            inner,
            options: Arc::clone(&self.options),
        }
    }
}

/// The service created by [`RequestLoggingLayer`].
#[derive(Clone, Debug)]
pub struct RequestLogging<S> {
    inner: S,
    options: Arc<Options>,
}

impl<S> RequestLogging<S> {
    /// Seeds the request with its context and returns it.
    fn attach_context<B>(&self, request: &mut Request<B>, logger: &Logger) -> Context {
        let id = self
            .options
            .next_id
            .as_ref()
            .map(|next_id| next_id())
            .unwrap_or_default();
        let mut data = ContextData::new(id);
        data.insert(
            self.options.request_group.as_str(),
            Value::lazy(RequestData::new(request.method(), request.uri())),
        );

        let context = request
            .extensions()
            .get::<Context>()
            .cloned()
            .unwrap_or_default()
            .with_data(data)
            .with_logger(logger.clone());
        request.extensions_mut().insert(context.clone());
        context
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLogging<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
    S::Future: Send + 'static,
    ResBody: Body,
    ResBody::Error: fmt::Display,
{
    type Response = Response<LoggedBody<ResBody>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let options = Arc::clone(&self.options);
        let start = options.clock.now();
        let logger = options
            .logger
            .clone()
            .unwrap_or_else(|| default_logger().with_context_data(DEFAULT_CONTEXT_GROUP));
        let context = self.attach_context(&mut request, &logger);

        let future = self.inner.call(request);
        Box::pin(async move {
            let record = ServedRecord {
                logger,
                context,
                options,
                start,
            };
            match future.await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    Ok(response.map(|body| LoggedBody::new(body, record, status)))
                }
                Err(error) => {
                    record.finish(None, 0, Some(error.to_string()));
                    Err(error)
                }
            }
        })
    }
}

/// The pieces needed to log a request once its response is complete.
#[derive(Debug)]
struct ServedRecord {
    logger: Logger,
    context: Context,
    options: Arc<Options>,
    start: OffsetDateTime,
}

impl ServedRecord {
    fn finish(self, status: Option<u16>, written: u64, error: Option<String>) {
        let duration = self.options.clock.since(self.start);
        let response = response_group(&self.options.response_group, status, written, duration);
        match error {
            None => self
                .logger
                .info(&self.context, "request served", vec![response]),
            Some(error) => self.logger.warn(
                &self.context,
                "write response",
                vec![Attr::string("error", error), response],
            ),
        }
    }
}

/// A response body counting the bytes it yields; logs the request when the stream ends.
///
/// Created by [`RequestLogging`]. A body that is already at its end is logged right away.
#[derive(Debug)]
pub struct LoggedBody<B> {
    inner: Pin<Box<B>>,
    status: u16,
    written: u64,
    record: Option<ServedRecord>,
}

impl<B: Body> LoggedBody<B> {
    fn new(body: B, record: ServedRecord, status: u16) -> Self {
        let mut body = Self {
            inner: Box::pin(body),
            status,
            written: 0,
            record: Some(record),
        };
        if body.inner.is_end_stream() {
            body.finish(None);
        }
        body
    }
}

impl<B> LoggedBody<B> {
    /// Bytes of data frames yielded so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn finish(&mut self, error: Option<String>) {
        if let Some(record) = self.record.take() {
            record.finish(Some(self.status), self.written, error);
        }
    }
}

impl<B> Body for LoggedBody<B>
where
    B: Body,
    B::Error: fmt::Display,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.written += u64::try_from(data.remaining()).unwrap_or(u64::MAX);
                }
            }
            Poll::Ready(Some(Err(error))) => this.finish(Some(error.to_string())),
            Poll::Ready(None) => this.finish(None),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for LoggedBody<B> {
    fn drop(&mut self) {
        self.finish(Some("response body dropped before its end".to_string()));
    }
}

fn response_group(name: &str, status: Option<u16>, written: u64, duration: Duration) -> Attr {
    let mut attrs = Vec::with_capacity(3);
    if let Some(status) = status {
        attrs.push(Attr::new("status", status));
    }
    attrs.push(Attr::new("written", written));
    attrs.push(Attr::duration("duration", duration));
    Attr::group(name, attrs)
}
