//! Plain-text rendering for the terminal.

use std::collections::HashMap;
use std::io::Write;

use coordination::debate::{
    DebateEvent, DebateScheduler, Decision, SessionEnvelope, SessionSummary, Turn, TurnId,
    TurnStatus,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

pub fn turn_header(turn: &Turn) -> String {
    match (turn.is_user(), turn.round_index()) {
        (true, _) => "[you]".to_string(),
        (false, Some(round)) => format!("[round {}] {}", round + 1, turn.display_role()),
        (false, None) => format!("[{}]", turn.display_role()),
    }
}

pub fn render_turn(turn: &Turn) -> String {
    let mut out = format!("{}\n{}", turn_header(turn), turn.content());
    match turn.status() {
        TurnStatus::Interrupted => out.push_str("\n  (interrupted)"),
        TurnStatus::Failed => out.push_str("\n  (failed)"),
        _ => {}
    }
    out
}

pub fn render_decision(decision: &Decision) -> String {
    let mut out = format!("DECISION: {}\n{}\n", decision.title, decision.rationale);
    if !decision.actions.is_empty() {
        out.push_str("\nActions:\n");
        for action in &decision.actions {
            out.push_str(&format!(
                "  - {} [owner: {}, effort: {:?}, impact: {:?}, cost: {}, timeline: {}]\n",
                action.title,
                action.owner,
                action.effort,
                action.impact,
                action.cost_range,
                action.timeline
            ));
        }
    }
    for (label, items) in [("Risks", &decision.risks), ("Metrics", &decision.metrics)] {
        if !items.is_empty() {
            out.push_str(&format!("\n{}:\n", label));
            for item in items {
                out.push_str(&format!("  - {}\n", item));
            }
        }
    }
    out
}

pub fn render_session(envelope: &SessionEnvelope) -> String {
    let mut out = format!(
        "session {} ({}, {}, {} rounds)\nprompt: {}\n",
        envelope.id, envelope.panel_id, envelope.status, envelope.total_rounds, envelope.prompt
    );
    for turn in envelope.transcript.iter() {
        out.push('\n');
        out.push_str(&render_turn(turn));
        out.push('\n');
    }
    if let Some(decision) = &envelope.decision {
        out.push('\n');
        out.push_str(&render_decision(decision));
    }
    out
}

pub fn render_summary(summary: &SessionSummary) -> String {
    let mut prompt: String = summary.prompt.chars().take(48).collect();
    if summary.prompt.chars().count() > 48 {
        prompt.push('…');
    }
    format!(
        "{}  {:<8}  {:<8}  {:>3} turns{}  {}  {}",
        summary.id,
        summary.panel_id,
        summary.status.to_string(),
        summary.turns,
        if summary.has_decision { "  +decision" } else { "" },
        summary.updated_at.format("%Y-%m-%d %H:%M"),
        prompt
    )
}

/// Echo streamed text to stdout as it lands in the transcript.
pub fn spawn_live_printer(scheduler: &DebateScheduler) -> JoinHandle<()> {
    let mut events = scheduler.subscribe();
    let scheduler = scheduler.clone();
    tokio::spawn(async move {
        let mut printed: HashMap<TurnId, usize> = HashMap::new();
        let mut stdout = std::io::stdout();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                DebateEvent::TurnStarted {
                    turn_id,
                    round,
                    agent_id,
                    ..
                } => {
                    let role = scheduler
                        .panel()
                        .agent_by_id(&agent_id)
                        .map(|a| a.display_role.clone())
                        .unwrap_or(agent_id);
                    let _ = write!(stdout, "\n[round {}] {}\n", round + 1, role);
                    printed.insert(turn_id, 0);
                }
                DebateEvent::ChunkAppended { turn_id, .. } => {
                    let Some(turn) = scheduler.transcript().get(&turn_id).cloned() else {
                        continue;
                    };
                    let seen = printed.entry(turn_id).or_insert(0);
                    if let Some(fresh) = turn.content().get(*seen..) {
                        let _ = write!(stdout, "{}", fresh);
                        *seen = turn.content().len();
                    }
                }
                DebateEvent::TurnFinished {
                    turn_id, status, ..
                } => {
                    if status == TurnStatus::Failed {
                        if let Some(turn) = scheduler.transcript().get(&turn_id) {
                            let seen = printed.get(&turn_id).copied().unwrap_or(0);
                            let _ = write!(stdout, "{}", turn.content().get(seen..).unwrap_or(""));
                        }
                    }
                    let _ = writeln!(stdout);
                }
                DebateEvent::StatusChanged { to, reason, .. } => {
                    let _ = writeln!(stdout, "\n-- {} ({})", to, reason);
                }
                _ => {}
            }
            let _ = stdout.flush();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::debate::{Agent, Decision};

    #[test]
    fn test_turn_header_uses_one_based_round() {
        let agent = Agent::new("risk", "Chief Risk Officer", "skeptical");
        let turn = Turn::agent(&agent, 2, 0, "Watch the timeline.");
        assert_eq!(turn_header(&turn), "[round 3] Chief Risk Officer");
        assert_eq!(turn_header(&Turn::user("hi")), "[you]");
    }

    #[test]
    fn test_render_decision_lists_sections() {
        let text = render_decision(&Decision::fallback());
        assert!(text.starts_with("DECISION: "));
        assert!(text.contains("Actions:"));
    }
}
