//! Streaming consumer: NDJSON decoding with cooperative cancellation.
//!
//! ```text
//! frame ──► NdjsonDecoder ──► StreamRecord { chunk, done, ts }
//!   ▲            │                   │
//!   │            └─ malformed: skip  ├─ chunk: on_chunk(text)
//!   │                                └─ done:  close, Completed { ts }
//!   └── select! { cancel → close, Cancelled | deadline → close, Timeout }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::GenerationError;
use super::port::ChunkStream;

/// One NDJSON record from the streaming Generation Port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(default)]
    pub chunk: String,
    #[serde(default)]
    pub done: bool,
    /// Completion timestamp in epoch milliseconds (only on the done record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<f64>,
}

impl StreamRecord {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            chunk: text.into(),
            done: false,
            ts: None,
        }
    }

    pub fn done(ts_millis: i64) -> Self {
        Self {
            chunk: String::new(),
            done: true,
            ts: Some(ts_millis as f64),
        }
    }

    /// Serialised record followed by a newline.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.ts
            .filter(|ts| ts.is_finite())
            .and_then(|ts| DateTime::from_timestamp_millis(ts as i64))
    }
}

/// Result of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Record(StreamRecord),
    Malformed(String),
}

/// Buffer-and-split NDJSON decoder.
///
/// Bytes after the last newline are held until the next frame, so records
/// (and multi-byte UTF-8 sequences) split across reads decode intact.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame; returns every complete line it finished.
    pub fn push(&mut self, frame: &[u8]) -> Vec<Decoded> {
        self.buf.extend_from_slice(frame);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(decoded) = decode_line(&line[..line.len() - 1]) {
                out.push(decoded);
            }
        }
        out
    }

    /// Decode whatever unterminated fragment is left at end of stream.
    pub fn finish(&mut self) -> Option<Decoded> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<Decoded> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<StreamRecord>(line) {
        Ok(record) => Decoded::Record(record),
        Err(_) => Decoded::Malformed(line.to_string()),
    })
}

/// How a consumed stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Completion marker seen (`ts` from the marker), or the transport
    /// ended cleanly without one (`ts` is `None`).
    Completed { ts: Option<DateTime<Utc>> },
    /// Cancellation observed; the stream was closed.
    Cancelled,
    /// Transport or read failure, including timeout.
    Failed(GenerationError),
}

/// Outcome plus counters for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    pub outcome: StreamOutcome,
    pub chunks: usize,
    pub malformed: usize,
}

/// Drives one chunk stream to completion, cancellation, or failure.
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    cancel: CancellationToken,
    timeout: Option<Duration>,
    started: Instant,
}

impl StreamConsumer {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            timeout: None,
            started: Instant::now(),
        }
    }

    /// Bound the whole stream by `timeout`, measured from `started`.
    pub fn with_deadline(mut self, timeout: Option<Duration>, started: Instant) -> Self {
        self.timeout = timeout;
        self.started = started;
        self
    }

    /// Consume `stream`, handing each chunk's text to `on_chunk`.
    ///
    /// `on_chunk` returns `false` to refuse the chunk (the owner observed
    /// cancellation under its own lock); the stream is then closed and the
    /// outcome is `Cancelled`. The stream is always closed before this
    /// returns.
    pub async fn consume<F>(&self, stream: &mut dyn ChunkStream, mut on_chunk: F) -> StreamReport
    where
        F: FnMut(&str) -> bool + Send,
    {
        let mut decoder = NdjsonDecoder::new();
        let mut chunks = 0usize;
        let mut malformed = 0usize;
        let deadline = self.timeout.map(|t| self.started + t);

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break StreamOutcome::Cancelled;
            }

            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StreamOutcome::Cancelled,
                _ = sleep_until_opt(deadline) => {
                    let ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                    break StreamOutcome::Failed(GenerationError::Timeout(ms));
                }
                frame = stream.next_frame() => frame,
            };

            let (decoded, eof) = match frame {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(err)) => break StreamOutcome::Failed(err),
                None => (decoder.finish().into_iter().collect(), true),
            };

            let mut finished = None;
            for item in decoded {
                match item {
                    Decoded::Malformed(line) => {
                        malformed += 1;
                        warn!(line = %truncate(&line, 120), "skipping malformed stream record");
                    }
                    Decoded::Record(record) => {
                        if !record.chunk.is_empty() {
                            if self.cancel.is_cancelled() || !on_chunk(&record.chunk) {
                                finished = Some(StreamOutcome::Cancelled);
                                break;
                            }
                            chunks += 1;
                        }
                        if record.done {
                            finished = Some(StreamOutcome::Completed {
                                ts: record.timestamp(),
                            });
                            break;
                        }
                    }
                }
            }

            if let Some(outcome) = finished {
                break outcome;
            }
            if eof {
                debug!(chunks, "stream ended without completion marker");
                break StreamOutcome::Completed { ts: None };
            }
        };

        stream.close().await;
        StreamReport {
            outcome,
            chunks,
            malformed,
        }
    }
}

pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::port::BufferedChunkStream;
    use async_trait::async_trait;

    /// Yields its frames, then hangs until closed.
    struct HangingStream {
        frames: Vec<Vec<u8>>,
        closed: bool,
    }

    #[async_trait]
    impl ChunkStream for HangingStream {
        async fn next_frame(&mut self) -> Option<Result<Vec<u8>, GenerationError>> {
            if !self.frames.is_empty() {
                return Some(Ok(self.frames.remove(0)));
            }
            std::future::pending().await
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_decoder_reassembles_split_records() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(br#"{"chunk":"He"#).is_empty());
        assert!(decoder.pending() > 0);

        let out = decoder.push(b"llo\",\"done\":false}\n{\"chunk\":\"\",\"done\":true,\"ts\":5}\n");
        assert_eq!(
            out,
            vec![
                Decoded::Record(StreamRecord::chunk("Hello")),
                Decoded::Record(StreamRecord::done(5)),
            ]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_handles_split_utf8() {
        let line = StreamRecord::chunk("né").to_line().into_bytes();
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let out = decoder.push(&line[split..]);
        assert_eq!(out, vec![Decoded::Record(StreamRecord::chunk("né"))]);
    }

    #[test]
    fn test_decoder_skips_blank_and_flags_malformed() {
        let mut decoder = NdjsonDecoder::new();
        let out = decoder.push(b"\r\n\nnot-json\n");
        assert_eq!(out, vec![Decoded::Malformed("not-json".to_string())]);
    }

    #[test]
    fn test_decoder_finish_parses_trailing_fragment() {
        let mut decoder = NdjsonDecoder::new();
        decoder.push(br#"{"chunk":"tail","done":false}"#);
        assert_eq!(
            decoder.finish(),
            Some(Decoded::Record(StreamRecord::chunk("tail")))
        );
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_malformed_line_scenario() {
        let mut stream = BufferedChunkStream::from_lines([
            r#"{"chunk":"A","done":false}"#,
            "not-json",
            r#"{"chunk":"B","done":false}"#,
            r#"{"chunk":"","done":true,"ts":1000}"#,
        ]);
        let mut content = String::new();
        let report = StreamConsumer::new(CancellationToken::new())
            .consume(&mut stream, |text| {
                content.push_str(text);
                true
            })
            .await;

        assert_eq!(content, "AB");
        assert_eq!(report.chunks, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(
            report.outcome,
            StreamOutcome::Completed {
                ts: DateTime::from_timestamp_millis(1000)
            }
        );
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn test_records_after_done_are_ignored() {
        let mut stream = BufferedChunkStream::new([format!(
            "{}{}{}",
            StreamRecord::chunk("x").to_line(),
            StreamRecord::done(1).to_line(),
            StreamRecord::chunk("late").to_line()
        )
        .into_bytes()]);
        let mut content = String::new();
        StreamConsumer::new(CancellationToken::new())
            .consume(&mut stream, |t| {
                content.push_str(t);
                true
            })
            .await;
        assert_eq!(content, "x");
    }

    #[tokio::test]
    async fn test_eof_without_marker_completes() {
        let mut stream = BufferedChunkStream::new([br#"{"chunk":"only"}"#.to_vec()]);
        let mut content = String::new();
        let report = StreamConsumer::new(CancellationToken::new())
            .consume(&mut stream, |t| {
                content.push_str(t);
                true
            })
            .await;
        assert_eq!(content, "only");
        assert_eq!(report.outcome, StreamOutcome::Completed { ts: None });
    }

    #[tokio::test]
    async fn test_read_error_fails_with_partial_kept() {
        let mut stream = BufferedChunkStream::from_lines([StreamRecord::chunk("part").to_line()])
            .then_fail(GenerationError::Stream("reset".into()));
        let mut content = String::new();
        let report = StreamConsumer::new(CancellationToken::new())
            .consume(&mut stream, |t| {
                content.push_str(t);
                true
            })
            .await;
        assert_eq!(content, "part");
        assert_eq!(
            report.outcome,
            StreamOutcome::Failed(GenerationError::Stream("reset".into()))
        );
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_closes_transport() {
        let cancel = CancellationToken::new();
        let mut stream = HangingStream {
            frames: vec![
                StreamRecord::chunk("Hel").to_line().into_bytes(),
                StreamRecord::chunk("lo").to_line().into_bytes(),
            ],
            closed: false,
        };

        let consumer = StreamConsumer::new(cancel.clone());
        let trigger = cancel.clone();
        let mut content = String::new();
        let report = consumer
            .consume(&mut stream, |t| {
                content.push_str(t);
                if content == "Hello" {
                    trigger.cancel();
                }
                true
            })
            .await;

        assert_eq!(content, "Hello");
        assert_eq!(report.outcome, StreamOutcome::Cancelled);
        assert!(stream.closed);
    }

    #[tokio::test]
    async fn test_refused_chunk_cancels() {
        let mut stream = BufferedChunkStream::from_lines([
            StreamRecord::chunk("a").to_line(),
            StreamRecord::chunk("b").to_line(),
        ]);
        let mut content = String::new();
        let report = StreamConsumer::new(CancellationToken::new())
            .consume(&mut stream, |t| {
                if !content.is_empty() {
                    return false;
                }
                content.push_str(t);
                true
            })
            .await;
        assert_eq!(content, "a");
        assert_eq!(report.outcome, StreamOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out_hung_stream() {
        let mut stream = HangingStream {
            frames: vec![StreamRecord::chunk("slow").to_line().into_bytes()],
            closed: false,
        };
        let consumer = StreamConsumer::new(CancellationToken::new())
            .with_deadline(Some(Duration::from_secs(30)), Instant::now());
        let mut content = String::new();
        let report = consumer
            .consume(&mut stream, |t| {
                content.push_str(t);
                true
            })
            .await;

        assert_eq!(content, "slow");
        assert_eq!(
            report.outcome,
            StreamOutcome::Failed(GenerationError::Timeout(30_000))
        );
        assert!(stream.closed);
    }
}
