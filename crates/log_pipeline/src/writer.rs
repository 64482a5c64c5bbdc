//! An in-memory sink for encoders.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing_subscriber::fmt::MakeWriter;

/// A growable byte buffer shared between its clones.
///
/// Handlers take it as their [`MakeWriter`]; the owner keeps a clone and reads what was written.
///
/// ```
/// use log_pipeline::{Context, HandlerOptions, Logger, SharedBuffer, TextHandler};
///
/// let buffer = SharedBuffer::new();
/// let logger = Logger::new(std::sync::Arc::new(TextHandler::new(
///     buffer.clone(),
///     HandlerOptions::default(),
/// )));
/// logger.info(&Context::new(), "captured", Vec::new());
/// assert!(buffer.to_string_lossy().contains("msg=captured"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Everything written so far, with invalid UTF-8 replaced.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// The writer handed out by [`SharedBuffer`]; holds the buffer lock while alive.
#[derive(Debug)]
pub struct SharedBufferWriter<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
}

impl io::Write for SharedBufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.guard, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = SharedBufferWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedBufferWriter { guard: self.lock() }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn clones_share_the_written_bytes() {
        let buffer = SharedBuffer::new();
        let writer_side = buffer.clone();
        assert!(buffer.is_empty());

        writer_side
            .make_writer()
            .write_all(b"line\n")
            .expect("write failed");

        assert_eq!(buffer.contents(), b"line\n");
        assert_eq!(buffer.to_string_lossy(), "line\n");
    }
}
