//! Debate events published by the scheduler.
//!
//! Fan-out uses a Tokio broadcast channel; a slow subscriber lags rather
//! than blocking the scheduling loop.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::decision::DecisionSource;
use super::state::SessionStatus;
use super::transcript::{TurnId, TurnStatus};

/// Default channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
        reason: String,
    },
    TurnStarted {
        turn_id: TurnId,
        round: u32,
        agent_index: usize,
        agent_id: String,
    },
    ChunkAppended {
        turn_id: TurnId,
        content_len: usize,
    },
    TurnFinished {
        turn_id: TurnId,
        round: u32,
        agent_index: usize,
        status: TurnStatus,
    },
    /// An empty in-flight turn was removed after cancellation.
    TurnWithdrawn { turn_id: TurnId },
    UserMessageAdded { turn_id: TurnId },
    DecisionReady { source: DecisionSource },
    Reset,
}

impl DebateEvent {
    /// Stable event name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::TurnStarted { .. } => "turn_started",
            Self::ChunkAppended { .. } => "chunk_appended",
            Self::TurnFinished { .. } => "turn_finished",
            Self::TurnWithdrawn { .. } => "turn_withdrawn",
            Self::UserMessageAdded { .. } => "user_message_added",
            Self::DecisionReady { .. } => "decision_ready",
            Self::Reset => "reset",
        }
    }

    /// Whether this event marks a lifecycle boundary (persist immediately)
    /// rather than incremental transcript growth (persist debounced).
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::StatusChanged { .. } | Self::DecisionReady { .. } | Self::Reset
        )
    }
}

/// Broadcast bus for [`DebateEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DebateEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all subscribers; having none is not an error.
    pub fn publish(&self, event: DebateEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebateEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
