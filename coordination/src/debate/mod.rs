//! Debate Orchestration: a fixed panel of agents, one streamed turn at a time.
//!
//! A [`DebateScheduler`] walks `(round, agent)` positions in panel order,
//! streams each agent's turn from a [`GenerationPort`] into the shared
//! [`Transcript`], and can be stopped mid-stream, resumed, or reset. A
//! finished (or partial) transcript is condensed into a structured
//! [`Decision`] by the [`DecisionSynthesizer`].
//!
//! # Session Flow
//!
//! ```text
//! Idle ──start──► Debating ──rounds exhausted──► Complete
//!  ▲                │  ▲                            │
//!  │           stop │  │ resume                     │
//!  │                ▼  │                            │
//!  │               Paused ──synthesize──────────────┤
//!  │                                                │
//!  └──────────────────── reset (from any) ◄─────────┘
//! ```
//!
//! Resumption never needs a stored cursor: the next position is derived
//! from the transcript alone (see [`cursor`]), so a session persisted
//! through a [`SessionStore`] picks up where it left off after a restart.

pub mod autosave;
pub mod cursor;
pub mod decision;
pub mod error;
pub mod events;
pub mod panel;
pub mod persistence;
pub mod port;
pub mod scheduler;
pub mod state;
pub mod stream;
pub mod transcript;

pub use autosave::{Autosave, DEFAULT_AUTOSAVE_DEBOUNCE};
pub use cursor::{resume_cursor, Cursor, ResumptionCalculator, TranscriptDerived};
pub use decision::{
    parse_decision, strip_code_fences, Decision, DecisionAction, DecisionSource,
    DecisionSynthesizer, Effort, Impact, Synthesis,
};
pub use error::{DebateError, DebateResult, GenerationError, PersistenceError, TransitionError};
pub use events::{DebateEvent, EventBus, EVENT_CHANNEL_CAPACITY};
pub use panel::{Agent, Panel, DEFAULT_TOTAL_ROUNDS, USER_SPEAKER_ID};
pub use persistence::{
    InMemorySessionStore, IntegrityStatus, SessionEnvelope, SessionStore, SessionSummary,
    ENVELOPE_VERSION,
};
pub use port::{
    BoxChunkStream, BufferedChunkStream, ChunkStream, DecisionRequest, GenerationPort,
    TurnRequest,
};
pub use scheduler::{
    DebateScheduler, RunOutcome, SchedulerConfig, SessionSnapshot, Speaking,
    DEFAULT_TURN_DELAY, DEFAULT_TURN_TIMEOUT, INTERRUPTED_MARKER,
};
pub use state::{SessionStatus, StatusTracker, StatusTransition};
pub use stream::{NdjsonDecoder, StreamConsumer, StreamOutcome, StreamRecord, StreamReport};
pub use transcript::{Speaker, Transcript, TranscriptError, Turn, TurnId, TurnStatus};
