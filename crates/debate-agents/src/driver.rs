//! Session plumbing shared by the CLI commands: building the port, opening
//! stored sessions, and running a debate under autosave until it finishes
//! or an interrupt arrives.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use coordination::debate::{
    Autosave, DebateScheduler, GenerationPort, IntegrityStatus, Panel, RunOutcome,
    SessionStore, Synthesis, TurnId,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::http_port::HttpGenerationPort;
use crate::mock_port::MockGenerationPort;
use crate::store::FileSessionStore;

/// How a run is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Clear the transcript and start from round one.
    Fresh,
    /// Continue from the position the transcript implies.
    Resume,
}

pub struct Driver {
    config: AppConfig,
    port: Arc<dyn GenerationPort>,
    store: Arc<dyn SessionStore>,
}

impl Driver {
    pub fn new(
        config: AppConfig,
        port: Arc<dyn GenerationPort>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            port,
            store,
        }
    }

    /// Pick the port from the mock switch and store sessions on disk.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let port: Arc<dyn GenerationPort> = if config.mock {
            info!("using mock generation port");
            Arc::new(MockGenerationPort::new())
        } else {
            info!(url = %config.api_url, "using HTTP generation port");
            Arc::new(
                HttpGenerationPort::new(config.api_url.clone(), config.api_key.clone())
                    .context("Failed to build HTTP generation port")?,
            )
        };
        let store = Arc::new(FileSessionStore::new(config.sessions_dir.clone()));
        Ok(Self::new(config, port, store))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// A new session on `panel` with `prompt` set.
    pub fn new_session(&self, panel: Panel, prompt: &str) -> Result<DebateScheduler> {
        if prompt.trim().is_empty() {
            bail!("prompt must not be empty");
        }
        let scheduler = DebateScheduler::new(
            panel,
            Arc::clone(&self.port),
            self.config.scheduler_config(),
        );
        scheduler.set_prompt(prompt.trim());
        Ok(scheduler)
    }

    /// Load a stored session and rebuild its scheduler on the built-in
    /// panel it was recorded with.
    pub async fn open(&self, id: &str) -> Result<DebateScheduler> {
        let (envelope, integrity) = self
            .store
            .load(id)
            .await
            .with_context(|| format!("Failed to load session {}", id))?;
        if let IntegrityStatus::Recoverable { warnings } = &integrity {
            warn!(session = %id, repaired = warnings.len(), "session restored with repairs");
        }
        let panel = Panel::builtin(&envelope.panel_id)
            .with_context(|| format!("Unknown panel '{}'", envelope.panel_id))?;
        let scheduler = DebateScheduler::restore(
            panel,
            Arc::clone(&self.port),
            self.config.scheduler_config(),
            envelope,
        )?;
        Ok(scheduler)
    }

    /// Drive a debate with autosave attached. When `interrupt` resolves
    /// first the debate is stopped (left `Paused`) and the final state is
    /// flushed before returning.
    pub async fn run<I>(
        &self,
        scheduler: &DebateScheduler,
        mode: RunMode,
        interrupt: I,
    ) -> Result<RunOutcome>
    where
        I: Future<Output = ()>,
    {
        let autosave = Autosave::spawn(
            scheduler.clone(),
            Arc::clone(&self.store),
            self.config.autosave_debounce,
        );

        let run = async {
            match mode {
                RunMode::Fresh => scheduler.start(None).await,
                RunMode::Resume => scheduler.resume().await,
            }
        };
        tokio::pin!(run);

        let outcome = tokio::select! {
            outcome = &mut run => outcome,
            () = interrupt => {
                info!(session = %scheduler.id(), "interrupt received, pausing debate");
                scheduler.stop();
                run.await
            }
        };

        autosave.shutdown().await;
        let outcome = outcome.context("Debate run failed")?;
        info!(session = %scheduler.id(), ?outcome, status = %scheduler.status(), "run finished");
        Ok(outcome)
    }

    /// Append a user message to a stored session and persist it.
    pub async fn say(&self, id: &str, text: &str) -> Result<TurnId> {
        let scheduler = self.open(id).await?;
        let turn_id = scheduler.add_user_message(text)?;
        self.save(&scheduler).await?;
        Ok(turn_id)
    }

    /// Synthesize a decision for a stored session and persist it.
    pub async fn decide(&self, id: &str) -> Result<Synthesis> {
        let scheduler = self.open(id).await?;
        let synthesis = scheduler.synthesize().await?;
        self.save(&scheduler).await?;
        Ok(synthesis)
    }

    pub async fn save(&self, scheduler: &DebateScheduler) -> Result<()> {
        self.store
            .save(&scheduler.envelope())
            .await
            .with_context(|| format!("Failed to save session {}", scheduler.id()))
    }
}

/// Resolves on Ctrl-C. Never resolves where the signal cannot be observed.
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
