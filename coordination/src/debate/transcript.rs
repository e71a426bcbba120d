//! Transcript data model.
//!
//! A transcript is an ordered list of turns. Appending is always allowed;
//! an existing turn can only change while it is `Streaming`, and only by
//! appending text. Finalising a turn freezes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::panel::{Agent, USER_SPEAKER_ID};

/// Opaque unique turn identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TurnId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a turn. Serialised as the bare speaker id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Speaker {
    User,
    Agent(String),
}

impl Speaker {
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User => USER_SPEAKER_ID,
            Self::Agent(id) => id,
        }
    }
}

impl From<String> for Speaker {
    fn from(raw: String) -> Self {
        if raw == USER_SPEAKER_ID {
            Self::User
        } else {
            Self::Agent(raw)
        }
    }
}

impl From<Speaker> for String {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => USER_SPEAKER_ID.to_string(),
            Speaker::Agent(id) => id,
        }
    }
}

/// Lifecycle of a single turn's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// Generation in flight; content may still grow.
    Streaming,
    /// Completion marker observed (or user turn).
    #[default]
    Complete,
    /// Cut short by `stop()`; holds whatever arrived before.
    Interrupted,
    /// Generation failed; holds partial content plus a fallback marker.
    Failed,
}

impl TurnStatus {
    pub fn is_frozen(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// One conversational message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    id: TurnId,
    speaker_id: Speaker,
    display_role: String,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    round_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_index: Option<usize>,
    #[serde(default)]
    status: TurnStatus,
}

impl Turn {
    /// A frozen user-authored turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            speaker_id: Speaker::User,
            display_role: "You".to_string(),
            content: text.into(),
            created_at: Utc::now(),
            round_index: None,
            agent_index: None,
            status: TurnStatus::Complete,
        }
    }

    /// An empty, streaming turn for `agent` at (`round`, `agent_index`).
    pub fn placeholder(agent: &Agent, round: u32, agent_index: usize) -> Self {
        Self {
            id: TurnId::new(),
            speaker_id: Speaker::Agent(agent.id.clone()),
            display_role: agent.display_role.clone(),
            content: String::new(),
            created_at: Utc::now(),
            round_index: Some(round),
            agent_index: Some(agent_index),
            status: TurnStatus::Streaming,
        }
    }

    /// A finished agent turn, e.g. when rebuilding a transcript.
    pub fn agent(
        agent: &Agent,
        round: u32,
        agent_index: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            status: TurnStatus::Complete,
            ..Self::placeholder(agent, round, agent_index)
        }
    }

    pub fn id(&self) -> &TurnId {
        &self.id
    }

    pub fn speaker(&self) -> &Speaker {
        &self.speaker_id
    }

    pub fn display_role(&self) -> &str {
        &self.display_role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn round_index(&self) -> Option<u32> {
        self.round_index
    }

    pub fn agent_index(&self) -> Option<usize> {
        self.agent_index
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn is_user(&self) -> bool {
        self.speaker_id.is_user()
    }

    /// Counts towards the resumption cursor: agent-authored with content.
    pub fn is_completed_agent_turn(&self) -> bool {
        !self.is_user() && !self.content.trim().is_empty()
    }
}

/// Rejected transcript mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("turn {0} not found")]
    UnknownTurn(TurnId),
    #[error("turn {0} is frozen")]
    Frozen(TurnId),
}

/// Ordered sequence of turns; insertion order is conversational order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn get(&self, id: &TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| &t.id == id)
    }

    /// Append a turn and return its id.
    pub fn push(&mut self, turn: Turn) -> TurnId {
        let id = turn.id.clone();
        self.turns.push(turn);
        id
    }

    /// Append streamed text to an in-flight turn; returns the new length.
    pub fn append_chunk(&mut self, id: &TurnId, text: &str) -> Result<usize, TranscriptError> {
        let turn = self.streaming_turn_mut(id)?;
        turn.content.push_str(text);
        Ok(turn.content.len())
    }

    /// Freeze an in-flight turn with its final status and timestamp.
    pub fn finalize(
        &mut self,
        id: &TurnId,
        status: TurnStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TranscriptError> {
        let turn = self.streaming_turn_mut(id)?;
        turn.status = if status.is_frozen() {
            status
        } else {
            TurnStatus::Complete
        };
        turn.created_at = at;
        Ok(())
    }

    /// Replace the content of an in-flight turn with fallback text and
    /// freeze it as failed.
    pub fn fail(&mut self, id: &TurnId, content: String) -> Result<(), TranscriptError> {
        let turn = self.streaming_turn_mut(id)?;
        turn.content = content;
        turn.status = TurnStatus::Failed;
        turn.created_at = Utc::now();
        Ok(())
    }

    /// Remove an in-flight turn that never received any content.
    ///
    /// Returns `false` (and leaves the transcript untouched) if the turn is
    /// unknown, frozen, or already has content.
    pub fn withdraw_placeholder(&mut self, id: &TurnId) -> bool {
        let Some(pos) = self.turns.iter().position(|t| &t.id == id) else {
            return false;
        };
        let turn = &self.turns[pos];
        if turn.status.is_frozen() || !turn.content.is_empty() {
            return false;
        }
        self.turns.remove(pos);
        true
    }

    /// Freeze every still-streaming turn as interrupted.
    ///
    /// Used when restoring a session whose stream died with the process.
    pub fn interrupt_streaming(&mut self) -> usize {
        let mut count = 0;
        for turn in self.turns.iter_mut().filter(|t| !t.status.is_frozen()) {
            turn.status = TurnStatus::Interrupted;
            count += 1;
        }
        count
    }

    /// Agent turns with non-empty trimmed content.
    pub fn completed_agent_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.is_completed_agent_turn())
            .count()
    }

    fn streaming_turn_mut(&mut self, id: &TurnId) -> Result<&mut Turn, TranscriptError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| TranscriptError::UnknownTurn(id.clone()))?;
        if turn.status.is_frozen() {
            return Err(TranscriptError::Frozen(id.clone()));
        }
        Ok(turn)
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
