//! One JSON file per session under a sessions directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use coordination::debate::{
    IntegrityStatus, PersistenceError, SessionEnvelope, SessionStore, SessionSummary,
};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistenceError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid session id '{}'", id),
            )));
        }
        Ok(self.dir.join(format!("{}.{}", id, EXTENSION)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, envelope: &SessionEnvelope) -> Result<(), PersistenceError> {
        let path = self.path_for(&envelope.id)?;
        let json = envelope.to_json()?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a crash never leaves a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(session = %envelope.id, path = %path.display(), "session saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(SessionEnvelope, IntegrityStatus), PersistenceError> {
        let path = self.path_for(id)?;
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        SessionEnvelope::from_json(&json)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let parsed = match tokio::fs::read_to_string(&path).await {
                Ok(json) => SessionEnvelope::from_json(&json),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok((envelope, _)) => summaries.push(envelope.summary()),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable session"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
