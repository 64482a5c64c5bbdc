#![cfg(feature = "http")]

use std::{
    collections::VecDeque,
    convert::Infallible,
    io,
    pin::Pin,
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, Full};
use log_pipeline::{
    http::{ClientLoggingLayer, RequestLoggingLayer},
    Chain, Context, HandlerOptions, JsonHandler, Logger, MockClock, SharedBuffer,
};
use serde_json::json;
use tower::{service_fn, Layer, ServiceExt};

fn json_logger(buffer: &SharedBuffer) -> Logger {
    Chain::new(JsonHandler::new(
        buffer.clone(),
        HandlerOptions::default(),
    ))
    .context_data("")
    .into_logger()
}

fn records(buffer: &SharedBuffer) -> Vec<serde_json::Value> {
    let bytes = buffer.contents();
    serde_json::Deserializer::from_slice(&bytes)
        .into_iter::<serde_json::Value>()
        .map(|record| {
            let mut record = record.expect("invalid JSON line");
            if let Some(object) = record.as_object_mut() {
                object.remove("time");
            }
            record
        })
        .collect()
}

/// Yields its chunks one frame at a time without a size hint, then the error if one is set.
struct Chunked {
    chunks: VecDeque<Bytes>,
    error: Option<io::Error>,
}

impl Chunked {
    fn new(chunks: &[&'static str], error: Option<io::Error>) -> Self {
        Self {
            chunks: chunks.iter().copied().map(Bytes::from).collect(),
            error,
        }
    }
}

impl Body for Chunked {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.get_mut();
        Poll::Ready(match this.chunks.pop_front() {
            Some(chunk) => Some(Ok(Frame::data(chunk))),
            None => this.error.take().map(Err),
        })
    }
}

fn get(uri: &str) -> Request<()> {
    Request::builder()
        .uri(uri)
        .body(())
        .expect("invalid request")
}

#[tokio::test]
async fn served_requests_are_logged_with_response_details() {
    let buffer = SharedBuffer::new();
    let clock = MockClock::default();
    let handler_clock = clock.clone();
    let service = service_fn(move |request: Request<()>| {
        let clock = handler_clock.clone();
        async move {
            if let Some(ctx) = request.extensions().get::<Context>() {
                if let Some(logger) = ctx.logger() {
                    logger.info(ctx, "handling", Vec::new());
                }
            }
            clock.advance(Duration::from_secs(1));
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"Hello, World!"))))
        }
    });

    let response = RequestLoggingLayer::new()
        .with_logger(json_logger(&buffer))
        .with_id(|| "id1".to_string())
        .with_clock(clock)
        .layer(service)
        .oneshot(get("https://example.com/path/"))
        .await
        .expect("service failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(records(&buffer).len(), 1);

    let body = response.into_body().collect().await.expect("body failed");
    assert_eq!(body.to_bytes(), Bytes::from_static(b"Hello, World!"));

    let request = json!({"method": "GET", "url": "https://example.com/path/"});
    assert_eq!(
        records(&buffer),
        vec![
            json!({
                "level": "INFO",
                "msg": "handling",
                "id": "id1",
                "request": request,
            }),
            json!({
                "level": "INFO",
                "msg": "request served",
                "id": "id1",
                "request": request,
                "response": {"status": 200, "written": 13, "duration": 1_000_000_000},
            }),
        ]
    );
}

#[tokio::test]
async fn streamed_bodies_are_counted_as_they_are_sent() {
    let buffer = SharedBuffer::new();
    let service = service_fn(|_: Request<()>| async {
        Ok::<_, Infallible>(Response::new(Chunked::new(&["Hello", ", ", "World!"], None)))
    });

    let response = RequestLoggingLayer::new()
        .with_logger(json_logger(&buffer))
        .with_clock(MockClock::default())
        .layer(service)
        .oneshot(get("https://example.com/stream"))
        .await
        .expect("service failed");
    let mut body = response.into_body();
    let mut counts = Vec::new();
    while let Some(frame) = body.frame().await {
        frame.expect("frame failed");
        counts.push(body.written());
    }
    assert_eq!(counts, [5, 7, 13]);

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "INFO",
            "msg": "request served",
            "request": {"method": "GET", "url": "https://example.com/stream"},
            "response": {"status": 200, "written": 13, "duration": 0},
        })]
    );
}

#[tokio::test]
async fn body_errors_are_logged_as_warnings() {
    let buffer = SharedBuffer::new();
    let service = service_fn(|_: Request<()>| async {
        let error = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        Ok::<_, Infallible>(Response::new(Chunked::new(&["Hello, ", "World!"], Some(error))))
    });

    let response = RequestLoggingLayer::new()
        .with_logger(json_logger(&buffer))
        .with_clock(MockClock::default())
        .layer(service)
        .oneshot(get("https://example.com/stream"))
        .await
        .expect("service failed");
    let error = response
        .into_body()
        .collect()
        .await
        .expect_err("body should fail");
    assert_eq!(error.kind(), io::ErrorKind::ConnectionReset);

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "WARN",
            "msg": "write response",
            "request": {"method": "GET", "url": "https://example.com/stream"},
            "error": "connection reset by peer",
            "response": {"status": 200, "written": 13, "duration": 0},
        })]
    );
}

#[tokio::test]
async fn bodies_dropped_early_are_logged_as_warnings() {
    let buffer = SharedBuffer::new();
    let service = service_fn(|_: Request<()>| async {
        Ok::<_, Infallible>(Response::new(Chunked::new(&["Hello, ", "World!"], None)))
    });

    let response = RequestLoggingLayer::new()
        .with_logger(json_logger(&buffer))
        .with_clock(MockClock::default())
        .layer(service)
        .oneshot(get("https://example.com/stream"))
        .await
        .expect("service failed");
    let mut body = response.into_body();
    body.frame().await.expect("body ended").expect("frame failed");
    drop(body);

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "WARN",
            "msg": "write response",
            "request": {"method": "GET", "url": "https://example.com/stream"},
            "error": "response body dropped before its end",
            "response": {"status": 200, "written": 7, "duration": 0},
        })]
    );
}

#[tokio::test]
async fn empty_bodies_are_logged_right_away() {
    let buffer = SharedBuffer::new();
    let service = service_fn(|_: Request<()>| async {
        let response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(http_body_util::Empty::<Bytes>::new())
            .expect("invalid response");
        Ok::<_, Infallible>(response)
    });

    let response = RequestLoggingLayer::new()
        .with_logger(json_logger(&buffer))
        .with_clock(MockClock::default())
        .layer(service)
        .oneshot(get("https://example.com/ping"))
        .await
        .expect("service failed");

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "INFO",
            "msg": "request served",
            "request": {"method": "GET", "url": "https://example.com/ping"},
            "response": {"status": 204, "written": 0, "duration": 0},
        })]
    );
    drop(response);
    assert_eq!(records(&buffer).len(), 1);
}

#[tokio::test]
async fn failing_services_are_logged_as_warnings() {
    let buffer = SharedBuffer::new();
    let service = service_fn(|_: Request<()>| async {
        Err::<Response<Full<Bytes>>, _>(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"))
    });

    let result = RequestLoggingLayer::new()
        .with_logger(json_logger(&buffer))
        .with_clock(MockClock::default())
        .with_group_names("req", "res")
        .layer(service)
        .oneshot(get("https://example.com/upload"))
        .await;
    assert!(result.is_err());

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "WARN",
            "msg": "write response",
            "req": {"method": "GET", "url": "https://example.com/upload"},
            "error": "connection reset",
            "res": {"written": 0, "duration": 0},
        })]
    );
}

#[tokio::test]
async fn client_roundtrips_use_the_context_logger() {
    let buffer = SharedBuffer::new();
    let client = service_fn(|_: Request<()>| async {
        let response = Response::builder()
            .header(header::CONTENT_LENGTH, "14")
            .body(Full::new(Bytes::from_static(b"{\"ok\": true}\r\n")))
            .expect("invalid response");
        Ok::<_, Infallible>(response)
    });

    let mut request = get("https://example.com/api");
    request
        .extensions_mut()
        .insert(Context::new().with_logger(json_logger(&buffer)));

    ClientLoggingLayer::new()
        .with_clock(MockClock::default())
        .layer(client)
        .oneshot(request)
        .await
        .expect("client failed");

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "INFO",
            "msg": "request roundtrip",
            "request": {"method": "GET", "url": "https://example.com/api"},
            "duration": 0,
            "response": {"status": "200 OK", "content_length": 14},
        })]
    );
}

#[tokio::test]
async fn client_errors_are_logged_through_the_fallback_logger() {
    let buffer = SharedBuffer::new();
    let client = service_fn(|_: Request<()>| async {
        Err::<Response<Full<Bytes>>, _>(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"))
    });

    let result = ClientLoggingLayer::new()
        .with_fallback_logger(json_logger(&buffer))
        .with_clock(MockClock::default())
        .layer(client)
        .oneshot(get("https://example.com/api"))
        .await;
    assert!(result.is_err());

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "ERROR",
            "msg": "request roundtrip",
            "request": {"method": "GET", "url": "https://example.com/api"},
            "duration": 0,
            "error": "deadline exceeded",
        })]
    );
}

#[tokio::test]
async fn clients_without_any_logger_pass_requests_through() {
    let client = service_fn(|_: Request<()>| async {
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"ok"))))
    });

    let response = ClientLoggingLayer::new()
        .layer(client)
        .oneshot(get("https://example.com/api"))
        .await
        .expect("client failed");

    assert_eq!(response.status(), StatusCode::OK);
}
