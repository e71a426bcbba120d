//! End-to-end driver runs over the mock port and a file store: interrupt,
//! restart from disk, resume, then user input and decision synthesis.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use coordination::debate::{
    DebateEvent, DecisionSource, Panel, RunOutcome, SessionStatus, TurnStatus,
};
use debate_agents::{AppConfig, Driver, FileSessionStore, MockGenerationPort, RunMode};

fn config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::from_lookup(|_| None);
    config.mock = true;
    config.sessions_dir = dir.to_path_buf();
    config.turn_delay = Duration::from_millis(50);
    config.turn_timeout = Some(Duration::from_secs(5));
    config.autosave_debounce = Duration::from_millis(100);
    config
}

fn driver(dir: &Path) -> Driver {
    Driver::new(
        config(dir),
        Arc::new(MockGenerationPort::new()),
        Arc::new(FileSessionStore::new(dir)),
    )
}

fn council(rounds: u32) -> Panel {
    Panel::strategy_council().with_total_rounds(rounds).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_run_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first = driver(dir.path());
    let scheduler = first
        .new_session(council(2), "  Replace the chillers this year?  ")
        .unwrap();
    let id = scheduler.id().to_string();

    let mut events = scheduler.subscribe();
    let interrupt = async move {
        loop {
            if let Ok(DebateEvent::TurnFinished { .. }) = events.recv().await {
                return;
            }
        }
    };
    let outcome = first
        .run(&scheduler, RunMode::Fresh, interrupt)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(scheduler.status(), SessionStatus::Paused);
    drop(scheduler);
    drop(first);

    // New process: nothing survives but the files on disk.
    let second = driver(dir.path());
    let (saved, _) = second.store().load(&id).await.unwrap();
    assert_eq!(saved.status, SessionStatus::Paused);
    assert_eq!(saved.prompt, "Replace the chillers this year?");
    assert_eq!(saved.transcript.len(), 1);

    let restored = second.open(&id).await.unwrap();
    let outcome = second
        .run(&restored, RunMode::Resume, std::future::pending())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let (saved, integrity) = second.store().load(&id).await.unwrap();
    assert!(integrity.is_valid());
    assert_eq!(saved.status, SessionStatus::Complete);
    assert_eq!(saved.transcript.len(), 8);
    let agents: Vec<&str> = saved
        .transcript
        .iter()
        .map(|t| t.speaker().id())
        .collect();
    assert_eq!(
        agents,
        vec![
            "finance",
            "sustainability",
            "operations",
            "risk",
            "finance",
            "sustainability",
            "operations",
            "risk"
        ]
    );
    assert!(saved
        .transcript
        .iter()
        .all(|t| t.status() == TurnStatus::Complete));
}

#[tokio::test(start_paused = true)]
async fn test_say_and_decide_persist_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path());
    let scheduler = driver.new_session(council(1), "Sign the PPA?").unwrap();
    let id = scheduler.id().to_string();
    driver
        .run(&scheduler, RunMode::Fresh, std::future::pending())
        .await
        .unwrap();

    driver.say(&id, "Legal needs two weeks.").await.unwrap();
    let synthesis = driver.decide(&id).await.unwrap();
    assert_eq!(synthesis.source, DecisionSource::Generated);
    assert_eq!(synthesis.decision.actions.len(), 2);

    let (saved, _) = driver.store().load(&id).await.unwrap();
    assert_eq!(saved.transcript.len(), 5);
    assert!(saved.transcript.last().unwrap().is_user());
    assert_eq!(saved.status, SessionStatus::Complete);
    assert_eq!(
        saved.decision.unwrap().title,
        "Pilot load shifting at the main site"
    );
}

#[tokio::test]
async fn test_blank_prompt_and_unknown_session_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path());
    assert!(driver.new_session(council(1), "   ").is_err());
    assert!(driver.open("missing").await.is_err());
    assert!(driver.say("missing", "hello").await.is_err());
}

#[tokio::test]
async fn test_from_config_uses_mock_switch() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Driver::from_config(config(dir.path())).unwrap();
    let scheduler = driver.new_session(council(1), "Quick check").unwrap();
    driver.save(&scheduler).await.unwrap();
    assert_eq!(driver.store().list().await.unwrap().len(), 1);
}
