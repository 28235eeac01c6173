//! Incremental decoder for `text/event-stream` response bodies.
//!
//! Bytes are pushed in with [`StreamDecoder::feed`] as they arrive from the
//! network. Complete frames (terminated by a blank line) are reported to a
//! [`FrameSink`]; a trailing partial frame is held until more bytes arrive.
//! Only `data:` lines are consumed, every other field is ignored.
//!
//! ```rust
//! use pulsync_protocol::sse::StreamDecoder;
//!
//! let mut frames = Vec::new();
//! let mut decoder = StreamDecoder::new(|payload: &str| frames.push(payload.to_string()));
//! decoder.feed(b"data: {\"a\":1}\n\nda");
//! decoder.feed(b"ta: {\"b\":2}\n\n");
//! decoder.finish();
//! drop(decoder);
//! assert_eq!(frames, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;

/// Payload that marks logical completion of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_FIELD: &[u8] = b"data:";

/// Terminal stream failure reported through [`FrameSink::on_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    /// The response carried an error status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The underlying transport failed.
    #[error("Stream failed: {0}")]
    Transport(String),
}

/// Receiver of decoded stream frames.
///
/// Only [`on_data`](FrameSink::on_data) is required.
pub trait FrameSink {
    /// A complete `data` payload.
    fn on_data(&mut self, payload: &str);

    /// The `[DONE]` sentinel was received.
    fn on_done(&mut self) {}

    /// The byte stream ended normally.
    fn on_finish(&mut self) {}

    /// The stream failed.
    fn on_error(&mut self, _error: SseError) {}
}

impl<F> FrameSink for F
where
    F: FnMut(&str),
{
    fn on_data(&mut self, payload: &str) {
        self(payload)
    }
}

/// Cloneable cancellation flag shared with a [`StreamDecoder`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create a new, uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. A callback already running finishes; none
    /// starts afterwards.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Accepting frames.
    Open,
    /// `[DONE]` received; later frames are dropped.
    Done,
    /// `finish()` was delivered.
    Finished,
    /// `on_error` was delivered.
    Failed,
    /// Cancelled; nothing more is delivered.
    Cancelled,
}

impl DecoderState {
    /// Check if no further callbacks can fire.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecoderState::Finished | DecoderState::Failed | DecoderState::Cancelled
        )
    }
}

/// Incremental `text/event-stream` decoder bound to one sink.
#[derive(Debug)]
pub struct StreamDecoder<S> {
    sink: S,
    buf: BytesMut,
    /// Bytes of `buf` already known to contain no newline.
    scanned: usize,
    /// Accumulated `data` lines of the current frame.
    data: Option<String>,
    state: DecoderState,
    cancel: CancelHandle,
}

impl<S: FrameSink> StreamDecoder<S> {
    /// Create a decoder delivering frames to `sink`.
    pub fn new(sink: S) -> Self {
        Self::with_cancel_handle(sink, CancelHandle::new())
    }

    /// Create a decoder observing an existing cancellation handle.
    pub fn with_cancel_handle(sink: S, cancel: CancelHandle) -> Self {
        Self {
            sink,
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
            data: None,
            state: DecoderState::Open,
            cancel,
        }
    }

    /// Get a handle that can cancel this decoder from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&mut self) -> DecoderState {
        self.observe_cancel();
        self.state
    }

    /// Access the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the decoder, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Report the response status before any body bytes.
    ///
    /// A status of 400 or above fails the stream without emitting data.
    pub fn status(&mut self, code: u16) {
        if code >= 400 {
            self.error(SseError::Status(code));
        }
    }

    /// Append a chunk and emit every complete frame it finishes.
    pub fn feed(&mut self, chunk: &[u8]) {
        if !self.accepting() {
            return;
        }
        self.buf.extend_from_slice(chunk);

        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                return;
            };
            let line = self.buf.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            if !self.accepting() {
                return;
            }
            self.process_line(&line[..line.len() - 1]);
        }
    }

    /// Signal the end of the byte stream. Any partial frame is discarded.
    pub fn finish(&mut self) {
        if !self.accepting() {
            return;
        }
        self.discard();
        self.state = DecoderState::Finished;
        self.sink.on_finish();
    }

    /// Signal a transport failure.
    pub fn error(&mut self, error: SseError) {
        if !self.accepting() {
            return;
        }
        self.discard();
        self.state = DecoderState::Failed;
        self.sink.on_error(error);
    }

    /// Stop consuming input and suppress every later callback.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.observe_cancel();
    }

    fn observe_cancel(&mut self) {
        if self.cancel.is_cancelled() && !self.state.is_terminal() {
            self.discard();
            self.state = DecoderState::Cancelled;
        }
    }

    fn accepting(&mut self) -> bool {
        self.observe_cancel();
        !self.state.is_terminal()
    }

    fn discard(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.data = None;
    }

    fn process_line(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.is_empty() {
            if let Some(payload) = self.data.take() {
                self.emit(payload);
            }
            return;
        }

        let Some(value) = line.strip_prefix(DATA_FIELD) else {
            return;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        let value = String::from_utf8_lossy(value);

        match &mut self.data {
            Some(data) => {
                data.push('\n');
                data.push_str(&value);
            }
            None => self.data = Some(value.into_owned()),
        }
    }

    fn emit(&mut self, payload: String) {
        // Cancellation may land from another thread after the line check.
        if !self.accepting() || self.state == DecoderState::Done {
            return;
        }
        if payload == DONE_SENTINEL {
            self.state = DecoderState::Done;
            self.sink.on_done();
        } else {
            self.sink.on_data(&payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Recorder {
        frames: Vec<String>,
        done: usize,
        finished: usize,
        errors: Vec<SseError>,
    }

    impl FrameSink for Recorder {
        fn on_data(&mut self, payload: &str) {
            self.frames.push(payload.to_string());
        }

        fn on_done(&mut self) {
            self.done += 1;
        }

        fn on_finish(&mut self) {
            self.finished += 1;
        }

        fn on_error(&mut self, error: SseError) {
            self.errors.push(error);
        }
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Recorder {
        let mut decoder = StreamDecoder::new(Recorder::default());
        for chunk in chunks {
            decoder.feed(chunk);
        }
        decoder.finish();
        decoder.into_sink()
    }

    const TWO_FRAMES: &[u8] = b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";

    #[test]
    fn test_two_frames_whole() {
        let rec = decode_chunks(&[TWO_FRAMES]);
        assert_eq!(rec.frames, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
        assert_eq!(rec.finished, 1);
    }

    #[test]
    fn test_two_frames_split_mid_line() {
        let (a, b) = TWO_FRAMES.split_at(9);
        let rec = decode_chunks(&[a, b]);
        assert_eq!(rec.frames, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let stream: &[u8] = b": comment\r\nevent: delta\r\ndata: first\r\ndata:second\r\n\r\n\
            id: 7\ndata: {\"text\":\"caf\xc3\xa9\"}\n\n\ndata: tail\n\n";
        let expected = decode_chunks(&[stream]);
        assert_eq!(
            expected.frames,
            vec!["first\nsecond", "{\"text\":\"café\"}", "tail"]
        );

        for i in 0..=stream.len() {
            let (a, b) = stream.split_at(i);
            assert_eq!(decode_chunks(&[a, b]), expected, "split at {}", i);
            for j in i..=stream.len() {
                let (b1, b2) = b.split_at(j - i);
                assert_eq!(decode_chunks(&[a, b1, b2]), expected, "split at {}/{}", i, j);
            }
        }

        let bytes: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(decode_chunks(&bytes), expected);
    }

    #[test]
    fn test_partial_frame_retained_then_discarded() {
        let mut decoder = StreamDecoder::new(Recorder::default());
        decoder.feed(b"data: one\n\ndata: two\n");
        assert_eq!(decoder.sink().frames, vec!["one"]);

        decoder.finish();
        let rec = decoder.into_sink();
        assert_eq!(rec.frames, vec!["one"]);
        assert_eq!(rec.finished, 1);
    }

    #[test]
    fn test_cancel_from_sink_stops_emission() {
        struct CancelAfterFirst {
            handle: CancelHandle,
            frames: Vec<String>,
            finished: bool,
        }

        impl FrameSink for CancelAfterFirst {
            fn on_data(&mut self, payload: &str) {
                self.frames.push(payload.to_string());
                self.handle.cancel();
            }

            fn on_finish(&mut self) {
                self.finished = true;
            }
        }

        let handle = CancelHandle::new();
        let sink = CancelAfterFirst {
            handle: handle.clone(),
            frames: Vec::new(),
            finished: false,
        };
        let mut decoder = StreamDecoder::with_cancel_handle(sink, handle);
        decoder.feed(b"data: 1\n\ndata: 2\n\ndata: 3\n\n");
        decoder.feed(b"data: 4\n\n");
        decoder.finish();

        assert_eq!(decoder.state(), DecoderState::Cancelled);
        let sink = decoder.into_sink();
        assert_eq!(sink.frames, vec!["1"]);
        assert!(!sink.finished);
    }

    #[test]
    fn test_cancel_from_another_thread_during_callback() {
        use std::sync::mpsc::{channel, Receiver, Sender};

        struct Blocking {
            frames: Vec<String>,
            started: Sender<()>,
            resume: Receiver<()>,
        }

        impl FrameSink for Blocking {
            fn on_data(&mut self, payload: &str) {
                self.frames.push(payload.to_string());
                if self.frames.len() == 1 {
                    self.started.send(()).unwrap();
                    self.resume.recv().unwrap();
                }
            }
        }

        let (started_tx, started_rx) = channel();
        let (resume_tx, resume_rx) = channel();
        let handle = CancelHandle::new();
        let canceller = {
            let handle = handle.clone();
            std::thread::spawn(move || {
                started_rx.recv().unwrap();
                handle.cancel();
                resume_tx.send(()).unwrap();
            })
        };

        let sink = Blocking {
            frames: Vec::new(),
            started: started_tx,
            resume: resume_rx,
        };
        let mut decoder = StreamDecoder::with_cancel_handle(sink, handle);
        decoder.feed(b"data: 1\n\ndata: 2\n\n");
        canceller.join().unwrap();

        assert_eq!(decoder.state(), DecoderState::Cancelled);
        assert_eq!(decoder.into_sink().frames, vec!["1"]);
    }

    #[test]
    fn test_cancel_suppresses_terminal_callbacks() {
        let mut decoder = StreamDecoder::new(Recorder::default());
        let handle = decoder.cancel_handle();
        decoder.feed(b"data: x");
        handle.cancel();
        decoder.feed(b"\n\n");
        decoder.error(SseError::Transport("reset".into()));
        decoder.finish();
        assert_eq!(decoder.into_sink(), Recorder::default());
    }

    #[test]
    fn test_error_status_short_circuits() {
        let mut decoder = StreamDecoder::new(Recorder::default());
        decoder.status(503);
        decoder.feed(TWO_FRAMES);
        decoder.finish();

        assert_eq!(decoder.state(), DecoderState::Failed);
        let rec = decoder.into_sink();
        assert!(rec.frames.is_empty());
        assert_eq!(rec.errors, vec![SseError::Status(503)]);
        assert_eq!(rec.finished, 0);
    }

    #[test]
    fn test_success_status_is_ignored() {
        let mut decoder = StreamDecoder::new(Recorder::default());
        decoder.status(200);
        decoder.feed(TWO_FRAMES);
        assert_eq!(decoder.sink().frames.len(), 2);
    }

    #[test]
    fn test_done_sentinel() {
        let rec = decode_chunks(&[b"data: a\n\ndata: [DONE]\n\ndata: late\n\n"]);
        assert_eq!(rec.frames, vec!["a"]);
        assert_eq!(rec.done, 1);
        // Transport close is still reported separately.
        assert_eq!(rec.finished, 1);
    }

    #[test]
    fn test_terminal_signal_delivered_once() {
        let mut decoder = StreamDecoder::new(Recorder::default());
        decoder.error(SseError::Transport("eof".into()));
        decoder.error(SseError::Transport("again".into()));
        decoder.finish();
        let rec = decoder.into_sink();
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.finished, 0);
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut decoder = StreamDecoder::new(|p: &str| seen.push(p.len()));
            decoder.feed(b"data: abc\n\n");
        }
        assert_eq!(seen, vec![3]);
    }
}
