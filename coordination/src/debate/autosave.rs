//! Debounced autosave driven by scheduler events.
//!
//! Lifecycle events (status changes, decisions, resets) save at once.
//! Transcript growth arms a single timer; everything up to its expiry is
//! saved together, so a crash loses at most one debounce window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::DebateEvent;
use super::persistence::SessionStore;
use super::scheduler::DebateScheduler;
use super::stream::sleep_until_opt;

pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Handle to a running autosave task.
pub struct Autosave {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Autosave {
    /// Start saving `scheduler` into `store`.
    pub fn spawn(
        scheduler: DebateScheduler,
        store: Arc<dyn SessionStore>,
        debounce: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        // Subscribe before returning so no event is missed.
        let events = scheduler.subscribe();
        let handle = tokio::spawn(run(scheduler, store, debounce, shutdown.clone(), events));
        Self { shutdown, handle }
    }

    /// Stop the task after a final save.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.handle.await {
            warn!(error = %err, "autosave task ended abnormally");
        }
    }
}

async fn run(
    scheduler: DebateScheduler,
    store: Arc<dyn SessionStore>,
    debounce: Duration,
    shutdown: CancellationToken,
    mut events: broadcast::Receiver<DebateEvent>,
) {
    info!(session = %scheduler.id(), debounce_ms = debounce.as_millis() as u64, "autosave started");
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = sleep_until_opt(deadline) => {
                deadline = None;
                save(&scheduler, store.as_ref(), "debounced").await;
            }
            event = events.recv() => match event {
                Ok(event) if event.is_lifecycle() => {
                    deadline = None;
                    save(&scheduler, store.as_ref(), event.event_type()).await;
                }
                Ok(_) => {
                    deadline.get_or_insert_with(|| Instant::now() + debounce);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session = %scheduler.id(), skipped, "autosave lagged behind events");
                    deadline.get_or_insert_with(|| Instant::now() + debounce);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    save(&scheduler, store.as_ref(), "shutdown").await;
}

async fn save(scheduler: &DebateScheduler, store: &dyn SessionStore, trigger: &str) {
    let envelope = scheduler.envelope();
    match store.save(&envelope).await {
        Ok(()) => debug!(
            session = %envelope.id,
            trigger,
            turns = envelope.transcript.len(),
            "session saved"
        ),
        Err(err) => warn!(session = %envelope.id, trigger, error = %err, "autosave failed"),
    }
}
