use std::io;

use log_pipeline::{Chain, HandlerLayer, HandlerOptions, JsonHandler, Logger, SharedBuffer};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;

/// A sink that rejects every write.
struct Rejecting;

impl io::Write for Rejecting {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn json_logger(buffer: &SharedBuffer) -> Logger {
    Chain::new(JsonHandler::new(buffer.clone(), HandlerOptions::default())).into_logger()
}

// The only test of this binary: it installs the global subscriber.
#[test]
fn failed_records_are_reported_to_the_other_layers() {
    let buffer = SharedBuffer::new();
    let failing = Chain::new(JsonHandler::new(|| Rejecting, HandlerOptions::default())).into_logger();
    let subscriber = tracing_subscriber::registry()
        .with(HandlerLayer::new(failing))
        .with(HandlerLayer::new(json_logger(&buffer)));
    tracing::subscriber::set_global_default(subscriber).expect("global subscriber already set");

    tracing::info!(user = "alice", "signed in");

    let written: Vec<serde_json::Value> = serde_json::Deserializer::from_slice(&buffer.contents())
        .into_iter::<serde_json::Value>()
        .map(|record| {
            let mut record = record.expect("invalid JSON line");
            if let Some(object) = record.as_object_mut() {
                object.remove("time");
            }
            record
        })
        .collect();
    assert_eq!(
        written,
        vec![
            json!({
                "level": "ERROR",
                "msg": "Failed to forward an event to the logger",
                "error": "Failed to write log record: disk full",
            }),
            json!({"level": "INFO", "msg": "signed in", "user": "alice"}),
        ]
    );
}
