//! Session status state machine: statuses, transitions and history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TransitionError;

/// Oldest transitions are dropped past this many entries.
const MAX_TRANSITION_HISTORY: usize = 128;

/// Lifecycle status of a debate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Fresh or reset session; nothing running.
    #[default]
    Idle,
    /// The scheduling loop is running.
    Debating,
    /// Stopped mid-debate; resumable.
    Paused,
    /// All rounds ran, or a decision was synthesized.
    Complete,
}

impl SessionStatus {
    /// Whether only `reset` can leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(self) -> &'static [SessionStatus] {
        match self {
            Self::Idle => &[Self::Debating, Self::Complete],
            Self::Debating => &[Self::Paused, Self::Complete, Self::Idle],
            Self::Paused => &[Self::Debating, Self::Complete, Self::Idle],
            Self::Complete => &[Self::Idle],
        }
    }

    /// Parse a persisted status string, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "debating" => Some(Self::Debating),
            "paused" => Some(Self::Paused),
            "complete" | "completed" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Debating => write!(f, "debating"),
            Self::Paused => write!(f, "paused"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Current status plus the history of how it got there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusTracker {
    status: SessionStatus,
    transitions: Vec<StatusTransition>,
}

impl StatusTracker {
    /// Tracker starting at `status` with no history.
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status,
            transitions: Vec::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn transitions(&self) -> &[StatusTransition] {
        &self.transitions
    }

    /// Move to `to`, recording the reason.
    ///
    /// Returns the recorded transition, or an error when `to` is not
    /// reachable from the current status.
    pub fn transition(
        &mut self,
        to: SessionStatus,
        reason: &str,
    ) -> Result<StatusTransition, TransitionError> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.status.valid_transitions()
                ),
            });
        }

        let record = StatusTransition {
            from: self.status,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        };
        self.transitions.push(record.clone());
        if self.transitions.len() > MAX_TRANSITION_HISTORY {
            let excess = self.transitions.len() - MAX_TRANSITION_HISTORY;
            self.transitions.drain(..excess);
        }
        self.status = to;
        Ok(record)
    }

    /// Whether a transition to `to` would be accepted.
    pub fn can_transition(&self, to: SessionStatus) -> bool {
        self.status.valid_transitions().contains(&to)
    }
}
