//! Generation Port: the scheduler's only view of the text generator.
//!
//! Two capabilities: a streaming one that opens one turn and yields raw
//! NDJSON frames, and a one-shot one used for decision synthesis. The
//! transport behind them (HTTP, pipe, in-process mock) is irrelevant here.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::Serialize;

use super::error::GenerationError;
use super::transcript::Transcript;

/// Request for one agent turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// The running prompt, after panel framing.
    pub prompt: String,
    /// Everything said so far, excluding the turn being generated.
    pub transcript: Transcript,
    pub agent_id: String,
    /// 1-based round number.
    pub round: u32,
}

/// Request for the one-shot decision call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub prompt: String,
    pub transcript: Transcript,
}

/// Lazy, cancellable sequence of raw frames from one generation request.
///
/// Frame boundaries are arbitrary: a frame may hold several NDJSON records
/// or a fragment of one.
#[async_trait]
pub trait ChunkStream: Send {
    /// Next frame, or `None` once the transport is exhausted.
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, GenerationError>>;

    /// Release the underlying transport. Must be idempotent.
    async fn close(&mut self);
}

pub type BoxChunkStream = Box<dyn ChunkStream>;

/// External text generation capability.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Open a streaming generation for one agent turn.
    async fn open_turn(&self, request: TurnRequest) -> Result<BoxChunkStream, GenerationError>;

    /// Single non-streaming request returning the raw decision text.
    async fn complete_decision(&self, request: DecisionRequest)
        -> Result<String, GenerationError>;
}

/// In-memory chunk stream over pre-built frames.
#[derive(Debug, Default)]
pub struct BufferedChunkStream {
    frames: VecDeque<Result<Vec<u8>, GenerationError>>,
    closed: bool,
}

impl BufferedChunkStream {
    pub fn new(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().map(Ok).collect(),
            closed: false,
        }
    }

    /// One frame per line, each terminated with `\n`.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            lines
                .into_iter()
                .map(|l| format!("{}\n", l.as_ref()).into_bytes()),
        )
    }

    /// Queue a read error after the frames already buffered.
    pub fn then_fail(mut self, err: GenerationError) -> Self {
        self.frames.push_back(Err(err));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl ChunkStream for BufferedChunkStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, GenerationError>> {
        if self.closed {
            return None;
        }
        self.frames.pop_front()
    }

    async fn close(&mut self) {
        self.closed = true;
        self.frames.clear();
    }
}
