//! Push-vs-buffer delivery of shell output.
//!
//! Every chunk is delivered exactly one way: pushed to the attached real-time
//! listeners, or appended to the session's [`OutputBuffer`]. A failed push
//! degrades to buffering so nothing is lost.

use protocol::ShellOutput;
use thiserror::Error;

use super::buffer::OutputBuffer;

/// Why a push did not reach any listener.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Nobody is subscribed to the destination.
    #[error("no listener for destination")]
    NoListener,

    /// Every listener's queue is full.
    #[error("listeners are backpressured")]
    Backpressured,

    /// Every listener has gone away.
    #[error("listeners closed")]
    Closed,
}

/// A refused push. Hands the event back so the caller can buffer it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("push to {} failed: {reason}", .event.destination)]
pub struct PushError {
    /// Why nobody took the event.
    pub reason: DeliveryError,
    /// The event that was not delivered.
    pub event: ShellOutput,
}

impl PushError {
    pub fn new(reason: DeliveryError, event: ShellOutput) -> Self {
        Self { reason, event }
    }
}

/// Real-time transport that delivers pushed output.
///
/// `push` must not block: it either hands the event over immediately or
/// fails, returning the event inside the error.
pub trait OutputSink: Send + Sync {
    /// Pushes one `ShellOutput` event to every listener of its destination.
    fn push(&self, event: ShellOutput) -> Result<(), PushError>;
}

/// How a chunk was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the real-time transport.
    Pushed,
    /// No listener attached; appended to the buffer.
    Buffered,
    /// A listener was attached but the push failed; appended to the buffer.
    Degraded(DeliveryError),
}

/// Per-session output state, guarded by one lock so that attaching a
/// listener and delivering a chunk never interleave.
#[derive(Debug)]
pub struct OutputState {
    /// Undelivered chunks.
    pub buffer: OutputBuffer,
    /// True while a real-time listener is attached.
    pub listener_attached: bool,
}

impl OutputState {
    /// Creates state with an empty buffer of `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: OutputBuffer::new(capacity),
            listener_attached: false,
        }
    }
}

/// Delivers one chunk according to the attach state.
pub fn relay(
    state: &mut OutputState,
    sink: &dyn OutputSink,
    destination: &str,
    chunk: String,
) -> Delivery {
    if !state.listener_attached {
        state.buffer.push(chunk);
        return Delivery::Buffered;
    }

    match sink.push(ShellOutput::new(destination, chunk)) {
        Ok(()) => Delivery::Pushed,
        Err(PushError { reason, event }) => {
            state.buffer.push(event.payload);
            Delivery::Degraded(reason)
        }
    }
}

/// Incremental UTF-8 decoder for a byte stream.
///
/// A multi-byte sequence split across chunks is held back until the rest
/// arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `pending + bytes` as forms complete characters.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                }
                Err(e) => {
                    let valid_up_to = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_up_to + len;
                        }
                        None => {
                            start = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        text
    }

    /// Flushes an incomplete trailing sequence as U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records pushes, or fails them all.
    struct RecordingSink {
        fail_with: Option<DeliveryError>,
        pushed: Mutex<Vec<ShellOutput>>,
    }

    impl RecordingSink {
        fn new(fail_with: Option<DeliveryError>) -> Self {
            Self {
                fail_with,
                pushed: Mutex::new(Vec::new()),
            }
        }
    }

    impl OutputSink for RecordingSink {
        fn push(&self, event: ShellOutput) -> Result<(), PushError> {
            if let Some(reason) = self.fail_with {
                return Err(PushError::new(reason, event));
            }
            self.pushed.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_buffers_without_listener() {
        let sink = RecordingSink::new(None);
        let mut state = OutputState::new(10);

        let delivery = relay(&mut state, &sink, "g:s", "ls\n".to_string());

        assert_eq!(delivery, Delivery::Buffered);
        assert_eq!(state.buffer.len(), 1);
        assert!(sink.pushed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pushes_with_listener() {
        let sink = RecordingSink::new(None);
        let mut state = OutputState::new(10);
        state.listener_attached = true;

        let delivery = relay(&mut state, &sink, "g:s", "ok\n".to_string());

        assert_eq!(delivery, Delivery::Pushed);
        assert!(state.buffer.is_empty());
        let pushed = sink.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].destination, "g:s");
        assert_eq!(pushed[0].payload, "ok\n");
    }

    #[test]
    fn test_failed_push_degrades_to_buffer() {
        let sink = RecordingSink::new(Some(DeliveryError::Backpressured));
        let mut state = OutputState::new(10);
        state.listener_attached = true;

        let delivery = relay(&mut state, &sink, "g:s", "lost?\n".to_string());

        assert_eq!(delivery, Delivery::Degraded(DeliveryError::Backpressured));
        assert_eq!(state.buffer.drain_all().output, "lost?\n");
    }

    #[test]
    fn test_order_preserved_across_buffered_chunks() {
        let sink = RecordingSink::new(Some(DeliveryError::NoListener));
        let mut state = OutputState::new(10);

        relay(&mut state, &sink, "g:s", "a".to_string());
        state.listener_attached = true;
        relay(&mut state, &sink, "g:s", "b".to_string());
        state.listener_attached = false;
        relay(&mut state, &sink, "g:s", "c".to_string());

        assert_eq!(state.buffer.drain_all().output, "abc");
    }

    #[test]
    fn test_decoder_ascii() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"ls\nfile.txt\n"), "ls\nfile.txt\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_carries_split_sequence() {
        // U+20AC EURO SIGN is E2 82 AC.
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xE2]), "x");
        assert_eq!(decoder.decode(&[0x82]), "");
        assert_eq!(decoder.decode(&[0xAC, b'y']), "\u{20AC}y");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_truncated_sequence() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xC3]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.decode(b"ok"), "ok");
    }
}
