//! Debate Coordination Library
//!
//! This library provides the multi-agent debate engine:
//! - Turn scheduling over a fixed panel, streamed one turn at a time
//! - Cooperative stop / resume / reset with partial output preserved
//! - Transcript-derived resumption for sessions restored after a restart
//! - Structured decision synthesis with a guaranteed-complete fallback
//!
//! Transport is pluggable through [`GenerationPort`]; persistence through
//! [`SessionStore`].
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = DebateScheduler::new(Panel::strategy_council(), port, SchedulerConfig::default());
//! scheduler.set_prompt("Should we move the data centre to off-peak hours?");
//! let outcome = scheduler.start(None).await?;
//! let synthesis = scheduler.synthesize().await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod debate;

// Re-export key debate types
pub use debate::{
    Agent, Autosave, Cursor, DebateError, DebateEvent, DebateResult, DebateScheduler, Decision,
    DecisionSynthesizer, GenerationError, GenerationPort, InMemorySessionStore, IntegrityStatus,
    Panel, PersistenceError, RunOutcome, SchedulerConfig, SessionEnvelope, SessionSnapshot,
    SessionStatus, SessionStore, Transcript, Turn, TurnStatus,
};
