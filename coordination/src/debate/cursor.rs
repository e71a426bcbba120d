//! Scheduling cursor and the resumption calculator.
//!
//! The cursor is derived, never authoritative: it can always be rebuilt
//! from the transcript, which is what lets a persisted session resume
//! after a restart without separate cursor bookkeeping.

use serde::{Deserialize, Serialize};

use super::transcript::Transcript;

/// Position of the next turn to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// 0-based round.
    pub round: u32,
    /// Index into the panel's agent list.
    pub agent_index: usize,
}

impl Cursor {
    pub fn new(round: u32, agent_index: usize) -> Self {
        Self { round, agent_index }
    }

    /// Fold an out-of-range agent index into the following rounds.
    pub fn normalized(self, panel_size: usize) -> Self {
        if panel_size == 0 || self.agent_index < panel_size {
            return self;
        }
        let carry = self.agent_index / panel_size;
        Self {
            round: self.round.saturating_add(carry as u32),
            agent_index: self.agent_index % panel_size,
        }
    }

    /// Whether no turns remain for a debate of `total_rounds`.
    pub fn is_exhausted(&self, total_rounds: u32) -> bool {
        self.round >= total_rounds
    }

    /// Agent turns already taken before this position.
    pub fn turns_before(&self, panel_size: usize) -> usize {
        self.round as usize * panel_size + self.agent_index
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "round {} / agent {}", self.round, self.agent_index)
    }
}

/// Computes where a paused or restored session continues from.
///
/// Implementations must be pure: same transcript, same cursor.
pub trait ResumptionCalculator: Send + Sync {
    fn resume_cursor(&self, transcript: &Transcript, panel_size: usize) -> Cursor;
}

/// Cursor derived from the number of completed agent turns.
///
/// A completed agent turn is one that is not user-authored and whose
/// trimmed content is non-empty. With `n` such turns and `p` agents, the
/// next turn is `(n / p, n % p)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptDerived;

impl ResumptionCalculator for TranscriptDerived {
    fn resume_cursor(&self, transcript: &Transcript, panel_size: usize) -> Cursor {
        resume_cursor(transcript, panel_size)
    }
}

/// Free-function form of [`TranscriptDerived`].
pub fn resume_cursor(transcript: &Transcript, panel_size: usize) -> Cursor {
    if panel_size == 0 {
        return Cursor::default();
    }
    let completed = transcript.completed_agent_turns();
    Cursor {
        round: (completed / panel_size) as u32,
        agent_index: completed % panel_size,
    }
    .normalized(panel_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::panel::Agent;
    use crate::debate::transcript::Turn;

    fn transcript_with(agent_turns: usize, panel_size: usize) -> Transcript {
        let agents: Vec<Agent> = (0..panel_size)
            .map(|i| Agent::new(format!("a{}", i), format!("Agent {}", i), ""))
            .collect();
        let mut transcript = Transcript::new();
        for k in 0..agent_turns {
            let idx = k % panel_size;
            transcript.push(Turn::agent(
                &agents[idx],
                (k / panel_size) as u32,
                idx,
                format!("turn {}", k),
            ));
        }
        transcript
    }

    #[test]
    fn test_empty_transcript_starts_at_origin() {
        let cursor = resume_cursor(&Transcript::new(), 4);
        assert_eq!(cursor, Cursor::new(0, 0));
    }

    #[test]
    fn test_div_mod_for_every_count() {
        for p in 1..=5usize {
            for k in 0..=(p * 6) {
                let transcript = transcript_with(k, p);
                let cursor = resume_cursor(&transcript, p);
                assert_eq!(cursor.round as usize, k / p, "k={} p={}", k, p);
                assert_eq!(cursor.agent_index, k % p, "k={} p={}", k, p);
                assert_eq!(cursor.turns_before(p), k);
            }
        }
    }

    #[test]
    fn test_idempotent() {
        let transcript = transcript_with(7, 3);
        let first = TranscriptDerived.resume_cursor(&transcript, 3);
        let second = TranscriptDerived.resume_cursor(&transcript, 3);
        assert_eq!(first, second);
        assert_eq!(first, Cursor::new(2, 1));
    }

    #[test]
    fn test_ignores_user_and_blank_turns() {
        let mut transcript = transcript_with(2, 2);
        transcript.push(Turn::user("clarify X"));
        let agent = Agent::new("a0", "Agent 0", "");
        transcript.push(Turn::agent(&agent, 1, 0, "  \t "));
        transcript.push(Turn::placeholder(&agent, 1, 0));

        assert_eq!(resume_cursor(&transcript, 2), Cursor::new(1, 0));
    }

    #[test]
    fn test_normalized_carries_overflow() {
        assert_eq!(Cursor::new(0, 2).normalized(2), Cursor::new(1, 0));
        assert_eq!(Cursor::new(1, 5).normalized(2), Cursor::new(3, 1));
        assert_eq!(Cursor::new(1, 1).normalized(2), Cursor::new(1, 1));
        assert_eq!(Cursor::new(1, 1).normalized(0), Cursor::new(1, 1));
    }

    #[test]
    fn test_zero_panel_is_total() {
        let transcript = transcript_with(3, 1);
        assert_eq!(resume_cursor(&transcript, 0), Cursor::default());
    }

    #[test]
    fn test_exhausted() {
        assert!(Cursor::new(6, 0).is_exhausted(6));
        assert!(!Cursor::new(5, 3).is_exhausted(6));
    }
}
