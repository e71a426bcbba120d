//! Offline Generation Port with canned, deterministic output.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use coordination::debate::{
    BoxChunkStream, ChunkStream, DecisionRequest, GenerationError, GenerationPort, StreamRecord,
    TurnRequest,
};
use serde_json::json;

const OPENINGS: &[&str] = &[
    "From where I sit,",
    "Building on what was said,",
    "I want to push back a little:",
    "Let me put a number on it:",
    "To keep us honest,",
];

const POSITIONS: &[&str] = &[
    "the cheapest option this quarter is to shift flexible load off the evening peak.",
    "we should pilot at one site before committing the whole budget.",
    "the reporting burden matters as much as the savings, so measure first.",
    "contract terms with the supplier will decide this more than the hardware will.",
    "the risk sits in the timeline, not the technology.",
];

/// Replies `<opening> <position>` chosen from the agent id and round, in
/// word-sized chunks.
#[derive(Debug, Clone, Default)]
pub struct MockGenerationPort {
    chunk_delay: Duration,
}

impl MockGenerationPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// The full text a turn will stream.
    pub fn remark(agent_id: &str, round: u32) -> String {
        let seed = agent_id.bytes().map(usize::from).sum::<usize>() + round as usize;
        format!(
            "{} {}",
            OPENINGS[seed % OPENINGS.len()],
            POSITIONS[(seed / 2) % POSITIONS.len()]
        )
    }

    pub fn decision_json() -> String {
        json!({
            "title": "Pilot load shifting at the main site",
            "rationale": "Every seat agreed the evening peak is the costliest hour, and a single-site pilot keeps the spend reversible.",
            "actions": [
                {
                    "title": "Move batch workloads to overnight windows",
                    "owner": "Operations",
                    "effort": "S",
                    "impact": "H",
                    "costRange": "$0–$5k",
                    "timeline": "2 weeks"
                },
                {
                    "title": "Meter the pilot site at 15-minute resolution",
                    "owner": "Facilities",
                    "effort": "M",
                    "impact": "M",
                    "costRange": "$10k–$20k",
                    "timeline": "1 month"
                }
            ],
            "risks": ["Overnight jobs may overrun into the morning shoulder"],
            "metrics": ["Peak-hour kWh", "Monthly demand charge"]
        })
        .to_string()
    }
}

#[async_trait]
impl GenerationPort for MockGenerationPort {
    async fn open_turn(&self, request: TurnRequest) -> Result<BoxChunkStream, GenerationError> {
        let text = Self::remark(&request.agent_id, request.round);
        let mut frames: VecDeque<Vec<u8>> = text
            .split_inclusive(' ')
            .map(|word| StreamRecord::chunk(word).to_line().into_bytes())
            .collect();
        frames.push_back(
            StreamRecord::done(chrono::Utc::now().timestamp_millis())
                .to_line()
                .into_bytes(),
        );
        Ok(Box::new(MockStream {
            frames,
            delay: self.chunk_delay,
        }))
    }

    async fn complete_decision(
        &self,
        _request: DecisionRequest,
    ) -> Result<String, GenerationError> {
        Ok(Self::decision_json())
    }
}

struct MockStream {
    frames: VecDeque<Vec<u8>>,
    delay: Duration,
}

#[async_trait]
impl ChunkStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, GenerationError>> {
        if self.frames.is_empty() {
            return None;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.frames.pop_front().map(Ok)
    }

    async fn close(&mut self) {
        self.frames.clear();
    }
}
