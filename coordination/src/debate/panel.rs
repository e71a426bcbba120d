//! Panel definitions: the fixed, ordered cast of a debate.

use serde::{Deserialize, Serialize};

use super::error::DebateError;

/// Rounds run by the built-in panels.
pub const DEFAULT_TOTAL_ROUNDS: u32 = 6;

/// Speaker id reserved for user-authored turns.
pub const USER_SPEAKER_ID: &str = "user";

/// One fixed identity on a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Stable id sent to the Generation Port.
    pub id: String,
    /// Human-readable role shown next to the agent's turns.
    pub display_role: String,
    /// Voice/style tag forwarded to presentation layers.
    pub style_tag: String,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        display_role: impl Into<String>,
        style_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_role: display_role.into(),
            style_tag: style_tag.into(),
        }
    }
}

/// Ordered agent list, round count, and optional prompt framing.
///
/// The agent order is the turn order inside every round and never changes
/// for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    id: String,
    agents: Vec<Agent>,
    total_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    framing: Option<String>,
}

impl Panel {
    /// Build a validated panel.
    ///
    /// Rejects an empty agent list, zero rounds, duplicate or blank agent
    /// ids, and the reserved `"user"` id.
    pub fn new(
        id: impl Into<String>,
        agents: Vec<Agent>,
        total_rounds: u32,
    ) -> Result<Self, DebateError> {
        if agents.is_empty() {
            return Err(DebateError::InvalidPanel("panel has no agents".into()));
        }
        if total_rounds == 0 {
            return Err(DebateError::InvalidPanel("total_rounds must be > 0".into()));
        }
        for (i, agent) in agents.iter().enumerate() {
            if agent.id.trim().is_empty() {
                return Err(DebateError::InvalidPanel(format!("agent {} has a blank id", i)));
            }
            if agent.id == USER_SPEAKER_ID {
                return Err(DebateError::InvalidPanel(format!(
                    "agent id '{}' is reserved",
                    USER_SPEAKER_ID
                )));
            }
            if agents[..i].iter().any(|a| a.id == agent.id) {
                return Err(DebateError::InvalidPanel(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        Ok(Self {
            id: id.into(),
            agents,
            total_rounds,
            framing: None,
        })
    }

    /// Attach a framing template applied to the prompt of every turn.
    ///
    /// Placeholders: `{prompt}`, `{round}` (1-based), `{role}`.
    pub fn with_framing(mut self, template: impl Into<String>) -> Self {
        self.framing = Some(template.into());
        self
    }

    /// Same agents, different round count.
    pub fn with_total_rounds(mut self, total_rounds: u32) -> Result<Self, DebateError> {
        if total_rounds == 0 {
            return Err(DebateError::InvalidPanel("total_rounds must be > 0".into()));
        }
        self.total_rounds = total_rounds;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn size(&self) -> usize {
        self.agents.len()
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Total agent turns in a full, uninterrupted debate.
    pub fn total_turns(&self) -> usize {
        self.agents.len() * self.total_rounds as usize
    }

    pub fn agent(&self, index: usize) -> Option<&Agent> {
        self.agents.get(index)
    }

    pub fn agent_by_id(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Prompt sent for `agent` in 1-based `round`.
    pub fn frame_prompt(&self, prompt: &str, agent: &Agent, round: u32) -> String {
        match &self.framing {
            Some(template) => template
                .replace("{prompt}", prompt)
                .replace("{round}", &round.to_string())
                .replace("{role}", &agent.display_role),
            None => prompt.to_string(),
        }
    }

    /// Four-seat strategy council used for organisation-level decisions.
    pub fn strategy_council() -> Self {
        Self {
            id: "council".to_string(),
            agents: vec![
                Agent::new("finance", "Chief Financial Officer", "measured"),
                Agent::new("sustainability", "Head of Sustainability", "earnest"),
                Agent::new("operations", "Operations Director", "pragmatic"),
                Agent::new("risk", "Chief Risk Officer", "skeptical"),
            ],
            total_rounds: DEFAULT_TOTAL_ROUNDS,
            framing: None,
        }
    }

    /// Three-seat grid desk used for short-horizon energy scheduling calls.
    pub fn grid_desk() -> Self {
        Self {
            id: "grid".to_string(),
            agents: vec![
                Agent::new("grid-analyst", "Grid Analyst", "precise"),
                Agent::new("energy-trader", "Energy Trader", "brisk"),
                Agent::new("facilities", "Facilities Manager", "plainspoken"),
            ],
            total_rounds: DEFAULT_TOTAL_ROUNDS,
            framing: Some(
                "{prompt}\n\nYou are speaking as the {role} in round {round}.".to_string(),
            ),
        }
    }

    /// Look up a built-in panel by id.
    pub fn builtin(id: &str) -> Option<Self> {
        match id {
            "council" => Some(Self::strategy_council()),
            "grid" => Some(Self::grid_desk()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_agents() -> Vec<Agent> {
        vec![Agent::new("a", "Alpha", "calm"), Agent::new("b", "Beta", "loud")]
    }

    #[test]
    fn test_valid_panel() {
        let panel = Panel::new("p", two_agents(), 2).unwrap();
        assert_eq!(panel.size(), 2);
        assert_eq!(panel.total_turns(), 4);
        assert_eq!(panel.agent(1).unwrap().id, "b");
        assert!(panel.agent(2).is_none());
        assert_eq!(panel.agent_by_id("a").unwrap().display_role, "Alpha");
    }

    #[test]
    fn test_rejects_invalid_panels() {
        assert!(Panel::new("p", vec![], 2).is_err());
        assert!(Panel::new("p", two_agents(), 0).is_err());

        let dup = vec![Agent::new("a", "A", ""), Agent::new("a", "A2", "")];
        assert!(matches!(
            Panel::new("p", dup, 1),
            Err(DebateError::InvalidPanel(msg)) if msg.contains("duplicate")
        ));

        let reserved = vec![Agent::new(USER_SPEAKER_ID, "You", "")];
        assert!(Panel::new("p", reserved, 1).is_err());

        let blank = vec![Agent::new("  ", "Nobody", "")];
        assert!(Panel::new("p", blank, 1).is_err());
    }

    #[test]
    fn test_builtin_panels() {
        let council = Panel::builtin("council").unwrap();
        assert_eq!(council.size(), 4);
        assert_eq!(council.total_rounds(), DEFAULT_TOTAL_ROUNDS);
        assert_eq!(council.total_turns(), 24);

        let grid = Panel::builtin("grid").unwrap();
        assert_eq!(grid.size(), 3);
        assert!(Panel::builtin("unknown").is_none());

        // Built-ins must pass the same validation as user panels.
        for panel in [council, grid] {
            Panel::new(panel.id(), panel.agents().to_vec(), panel.total_rounds()).unwrap();
        }
    }

    #[test]
    fn test_frame_prompt() {
        let plain = Panel::new("p", two_agents(), 1).unwrap();
        let agent = plain.agent(0).unwrap().clone();
        assert_eq!(plain.frame_prompt("Cut emissions?", &agent, 3), "Cut emissions?");

        let framed = plain.with_framing("[{role} r{round}] {prompt}");
        assert_eq!(
            framed.frame_prompt("Cut emissions?", &agent, 3),
            "[Alpha r3] Cut emissions?"
        );
    }

    #[test]
    fn test_with_total_rounds() {
        let panel = Panel::strategy_council().with_total_rounds(2).unwrap();
        assert_eq!(panel.total_turns(), 8);
        assert!(Panel::strategy_council().with_total_rounds(0).is_err());
    }
}
