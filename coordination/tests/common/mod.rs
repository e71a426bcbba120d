//! Shared helpers for debate integration tests: a scripted Generation Port
//! and event-waiting utilities. No network, no real model.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use coordination::debate::{
    Agent, BoxChunkStream, ChunkStream, DebateEvent, DecisionRequest, GenerationError,
    GenerationPort, Panel, SchedulerConfig, StreamRecord, TurnRequest,
};

/// Completion timestamp every scripted reply carries.
pub const DONE_TS: i64 = 1_000;

/// What the port does for one `open_turn` call.
#[derive(Clone)]
pub enum Script {
    /// Stream these chunks, then the completion marker.
    Reply(Vec<String>),
    /// Stream these raw NDJSON lines verbatim.
    Lines(Vec<String>),
    /// Fail the request before any stream exists.
    Refuse(GenerationError),
    /// Stream these chunks, then fail the read.
    FailAfter(Vec<String>, GenerationError),
    /// Stream `first`, wait for `gate`, then stream `rest` and complete.
    Gated {
        first: Vec<String>,
        gate: Arc<Notify>,
        rest: Vec<String>,
    },
    /// Stream these chunks, then never produce anything again.
    Hang(Vec<String>),
}

impl Script {
    pub fn reply(chunks: &[&str]) -> Self {
        Self::Reply(chunks.iter().map(|c| c.to_string()).collect())
    }

    pub fn hang(chunks: &[&str]) -> Self {
        Self::Hang(chunks.iter().map(|c| c.to_string()).collect())
    }
}

fn chunk_lines(chunks: &[String]) -> VecDeque<Result<Vec<u8>, GenerationError>> {
    chunks
        .iter()
        .map(|c| Ok(StreamRecord::chunk(c.clone()).to_line().into_bytes()))
        .collect()
}

fn done_line() -> Result<Vec<u8>, GenerationError> {
    Ok(StreamRecord::done(DONE_TS).to_line().into_bytes())
}

struct ScriptedStream {
    frames: VecDeque<Result<Vec<u8>, GenerationError>>,
    gate: Option<(Arc<Notify>, VecDeque<Result<Vec<u8>, GenerationError>>)>,
    hang: bool,
    closed: bool,
    close_delay: Duration,
    close_count: Arc<AtomicUsize>,
}

#[async_trait]
impl ChunkStream for ScriptedStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, GenerationError>> {
        if self.closed {
            return None;
        }
        if let Some(frame) = self.frames.pop_front() {
            return Some(frame);
        }
        if let Some((gate, rest)) = self.gate.take() {
            gate.notified().await;
            self.frames = rest;
            return self.frames.pop_front();
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if !self.close_delay.is_zero() {
                tokio::time::sleep(self.close_delay).await;
            }
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Port that plays back scripts by call index and records every request.
///
/// Calls without a script reply `"<agent> r<round>"` in two chunks.
pub struct ScriptedPort {
    scripts: Mutex<HashMap<usize, Script>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TurnRequest>>,
    decision: Mutex<Result<String, GenerationError>>,
    close_delay: Duration,
    closed: Arc<AtomicUsize>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            decision: Mutex::new(Ok("{}".to_string())),
            close_delay: Duration::ZERO,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script the `call`-th `open_turn` (0-based).
    pub fn script(self, call: usize, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(call, script);
        self
    }

    pub fn decision_response(self, response: Result<String, GenerationError>) -> Self {
        *self.decision.lock().unwrap() = response;
        self
    }

    /// Every stream's `close()` takes this long.
    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Streams closed so far.
    pub fn closed_streams(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationPort for ScriptedPort {
    async fn open_turn(&self, request: TurnRequest) -> Result<BoxChunkStream, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().remove(&call).unwrap_or_else(|| {
            Script::Reply(vec![
                format!("{} ", request.agent_id),
                format!("r{}", request.round),
            ])
        });
        self.requests.lock().unwrap().push(request);

        let mut stream = ScriptedStream {
            frames: VecDeque::new(),
            gate: None,
            hang: false,
            closed: false,
            close_delay: self.close_delay,
            close_count: Arc::clone(&self.closed),
        };
        match script {
            Script::Reply(chunks) => {
                stream.frames = chunk_lines(&chunks);
                stream.frames.push_back(done_line());
            }
            Script::Lines(lines) => {
                stream.frames = lines
                    .into_iter()
                    .map(|l| Ok(format!("{}\n", l).into_bytes()))
                    .collect();
            }
            Script::Refuse(err) => return Err(err),
            Script::FailAfter(chunks, err) => {
                stream.frames = chunk_lines(&chunks);
                stream.frames.push_back(Err(err));
            }
            Script::Gated { first, gate, rest } => {
                stream.frames = chunk_lines(&first);
                let mut tail = chunk_lines(&rest);
                tail.push_back(done_line());
                stream.gate = Some((gate, tail));
            }
            Script::Hang(chunks) => {
                stream.frames = chunk_lines(&chunks);
                stream.hang = true;
            }
        }
        Ok(Box::new(stream))
    }

    async fn complete_decision(&self, _request: DecisionRequest) -> Result<String, GenerationError> {
        self.decision.lock().unwrap().clone()
    }
}

/// Two agents, `a` then `b`.
pub fn pair_panel(rounds: u32) -> Panel {
    Panel::new(
        "pair",
        vec![Agent::new("a", "Alpha", "calm"), Agent::new("b", "Beta", "sharp")],
        rounds,
    )
    .unwrap()
}

/// No pacing delay, no timeout.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_turn_delay(Duration::ZERO)
        .with_turn_timeout(None)
}

/// Receive events until one matches `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<DebateEvent>, mut pred: F) -> DebateEvent
where
    F: FnMut(&DebateEvent) -> bool,
{
    loop {
        let event = rx.recv().await.expect("event bus closed");
        if pred(&event) {
            return event;
        }
    }
}
