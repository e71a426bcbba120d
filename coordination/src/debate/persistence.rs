//! Session persistence: the versioned Session Envelope and the store seam.
//!
//! Restoring is lenient: wrong-typed or missing fields are coerced to
//! safe defaults and reported through [`IntegrityStatus`] instead of
//! failing the restore. Only unreadable JSON or a newer schema version is
//! rejected outright.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::decision::Decision;
use super::error::PersistenceError;
use super::state::SessionStatus;
use super::transcript::{Transcript, Turn};

/// Current envelope schema version.
pub const ENVELOPE_VERSION: u32 = 1;

/// The persisted unit of one debate session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnvelope {
    pub version: u32,
    pub id: String,
    pub panel_id: String,
    pub prompt: String,
    pub transcript: Transcript,
    pub decision: Option<Decision>,
    pub status: SessionStatus,
    pub total_rounds: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionEnvelope {
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(|e| PersistenceError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Parse and leniently normalise a stored envelope.
    pub fn from_json(json: &str) -> Result<(Self, IntegrityStatus), PersistenceError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| PersistenceError::DeserializeFailed {
                reason: e.to_string(),
            })?;
        Self::from_value(&value)
    }

    /// Build an envelope from arbitrary JSON, coercing what it can.
    pub fn from_value(value: &Value) -> Result<(Self, IntegrityStatus), PersistenceError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PersistenceError::DeserializeFailed {
                reason: "envelope is not a JSON object".to_string(),
            })?;
        let mut warnings = Vec::new();

        let version = match obj.get("version").and_then(Value::as_u64) {
            Some(v) => u32::try_from(v).unwrap_or(u32::MAX),
            None => {
                warnings.push("missing version; assuming 1".to_string());
                ENVELOPE_VERSION
            }
        };
        if version > ENVELOPE_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: ENVELOPE_VERSION,
                found: version,
            });
        }

        let id = string_field(obj, "id", &mut warnings);
        let panel_id = string_field(obj, "panelId", &mut warnings);
        let prompt = string_field(obj, "prompt", &mut warnings);

        let mut transcript = transcript_field(obj.get("transcript"), &mut warnings);
        let interrupted = transcript.interrupt_streaming();
        if interrupted > 0 {
            warnings.push(format!("{} streaming turn(s) frozen as interrupted", interrupted));
        }

        let decision = match obj.get("decision") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let decision = Decision::from_value(raw);
                if decision.is_none() {
                    warnings.push("decision is not an object; dropped".to_string());
                }
                decision
            }
        };

        let status = match obj.get("status").and_then(Value::as_str) {
            Some(raw) => match SessionStatus::parse(raw) {
                Some(SessionStatus::Debating) => {
                    warnings.push("session was saved mid-debate; restored as paused".to_string());
                    SessionStatus::Paused
                }
                Some(status) => status,
                None => {
                    warnings.push(format!("unknown status '{}'; using idle", raw));
                    SessionStatus::Idle
                }
            },
            None => {
                warnings.push("missing status; using idle".to_string());
                SessionStatus::Idle
            }
        };

        let total_rounds = match obj.get("totalRounds").and_then(Value::as_u64) {
            Some(n) => u32::try_from(n).unwrap_or(0),
            None => {
                warnings.push("missing totalRounds; using 0".to_string());
                0
            }
        };

        let created_at = timestamp_field(obj, "createdAt", &mut warnings);
        let updated_at = timestamp_field(obj, "updatedAt", &mut warnings);

        let envelope = Self {
            version,
            id,
            panel_id,
            prompt,
            transcript,
            decision,
            status,
            total_rounds,
            created_at,
            updated_at,
        };
        let integrity = if warnings.is_empty() {
            IntegrityStatus::Valid
        } else {
            for warning in &warnings {
                warn!(session = %envelope.id, %warning, "envelope coerced on restore");
            }
            IntegrityStatus::Recoverable { warnings }
        };
        Ok((envelope, integrity))
    }

    /// Short listing entry.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            panel_id: self.panel_id.clone(),
            status: self.status,
            turns: self.transcript.len(),
            has_decision: self.decision.is_some(),
            prompt: self.prompt.clone(),
            updated_at: self.updated_at,
        }
    }
}

fn string_field(obj: &Map<String, Value>, key: &str, warnings: &mut Vec<String>) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => {
            warnings.push(format!("{} was a number; converted", key));
            n.to_string()
        }
        Some(_) => {
            warnings.push(format!("{} has the wrong type; using empty", key));
            String::new()
        }
        None => {
            warnings.push(format!("missing {}; using empty", key));
            String::new()
        }
    }
}

fn timestamp_field(
    obj: &Map<String, Value>,
    key: &str,
    warnings: &mut Vec<String>,
) -> DateTime<Utc> {
    obj.get(key)
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
        .unwrap_or_else(|| {
            warnings.push(format!("missing or invalid {}; using now", key));
            Utc::now()
        })
}

fn transcript_field(raw: Option<&Value>, warnings: &mut Vec<String>) -> Transcript {
    let Some(items) = raw.and_then(Value::as_array) else {
        if raw.is_some_and(|v| !v.is_null()) {
            warnings.push("transcript is not a list; using empty".to_string());
        } else {
            warnings.push("missing transcript; using empty".to_string());
        }
        return Transcript::new();
    };

    let mut turns = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match turn_from_value(item) {
            Some(turn) => turns.push(turn),
            None => warnings.push(format!("turn {} is malformed; dropped", index)),
        }
    }
    Transcript::from_turns(turns)
}

/// Fill the fields a turn can live without, then deserialize.
fn turn_from_value(raw: &Value) -> Option<Turn> {
    let mut obj = raw.as_object()?.clone();
    let speaker = obj.get("speakerId")?.as_str()?.to_string();
    obj.entry("content").or_insert_with(|| Value::String(String::new()));
    obj.entry("displayRole")
        .or_insert_with(|| Value::String(speaker.clone()));
    obj.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    obj.entry("createdAt")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    serde_json::from_value(Value::Object(obj)).ok()
}

/// Outcome of a lenient restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Every field was present and well-typed.
    Valid,
    /// Some fields were coerced; the session is still usable.
    Recoverable { warnings: Vec<String> },
}

impl IntegrityStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Recoverable { warnings } => warnings,
        }
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub panel_id: String,
    pub status: SessionStatus,
    pub turns: usize,
    pub has_decision: bool,
    pub prompt: String,
    pub updated_at: DateTime<Utc>,
}

/// Where session envelopes live.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, envelope: &SessionEnvelope) -> Result<(), PersistenceError>;

    async fn load(&self, id: &str) -> Result<(SessionEnvelope, IntegrityStatus), PersistenceError>;

    /// Every stored session, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, PersistenceError>;

    /// Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, PersistenceError>;
}

/// Process-local store. Envelopes are kept as JSON so loads take the same
/// lenient path as any other store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, envelope: &SessionEnvelope) -> Result<(), PersistenceError> {
        let json = envelope.to_json()?;
        self.sessions
            .write()
            .await
            .insert(envelope.id.clone(), json);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(SessionEnvelope, IntegrityStatus), PersistenceError> {
        let sessions = self.sessions.read().await;
        let json = sessions
            .get(id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        SessionEnvelope::from_json(json)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let sessions = self.sessions.read().await;
        let mut summaries = Vec::with_capacity(sessions.len());
        for (id, json) in sessions.iter() {
            match SessionEnvelope::from_json(json) {
                Ok((envelope, _)) => summaries.push(envelope.summary()),
                Err(err) => warn!(session = %id, error = %err, "skipping unreadable session"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::panel::Agent;
    use crate::debate::transcript::TurnStatus;
    use serde_json::json;

    fn make_envelope() -> SessionEnvelope {
        let agent = Agent::new("finance", "CFO", "measured");
        let mut transcript = Transcript::new();
        transcript.push(Turn::agent(&agent, 0, 0, "Costs first."));
        transcript.push(Turn::user("clarify X"));
        SessionEnvelope {
            version: ENVELOPE_VERSION,
            id: "s-001".to_string(),
            panel_id: "council".to_string(),
            prompt: "Should we electrify the fleet?".to_string(),
            transcript,
            decision: Some(Decision::fallback()),
            status: SessionStatus::Paused,
            total_rounds: 6,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_envelope_roundtrip_is_valid() {
        let envelope = make_envelope();
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"panelId\""));
        assert!(json.contains("\"totalRounds\""));

        let (restored, integrity) = SessionEnvelope::from_json(&json).unwrap();
        assert_eq!(integrity, IntegrityStatus::Valid);
        assert_eq!(restored, envelope);
    }

    #[test]
    fn test_version_mismatch() {
        let mut value = serde_json::to_value(make_envelope()).unwrap();
        value["version"] = json!(999);
        let err = SessionEnvelope::from_value(&value).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::VersionMismatch {
                expected: 1,
                found: 999
            }
        ));
    }

    #[test]
    fn test_unreadable_json_is_rejected() {
        assert!(matches!(
            SessionEnvelope::from_json("{not json"),
            Err(PersistenceError::DeserializeFailed { .. })
        ));
        assert!(matches!(
            SessionEnvelope::from_json("[1, 2]"),
            Err(PersistenceError::DeserializeFailed { .. })
        ));
    }

    #[test]
    fn test_corrupted_fields_are_coerced() {
        let value = json!({
            "version": 1,
            "id": "s-002",
            "prompt": 42,
            "transcript": "oops",
            "decision": [1, 2],
            "status": "exploded",
            "totalRounds": "six",
        });
        let (envelope, integrity) = SessionEnvelope::from_value(&value).unwrap();

        assert_eq!(envelope.id, "s-002");
        assert_eq!(envelope.prompt, "42");
        assert!(envelope.transcript.is_empty());
        assert!(envelope.decision.is_none());
        assert_eq!(envelope.status, SessionStatus::Idle);
        assert_eq!(envelope.total_rounds, 0);
        assert!(!integrity.is_valid());
        assert!(integrity.warnings().len() >= 5);
    }

    #[test]
    fn test_debating_restores_paused_with_interrupted_turns() {
        let agent = Agent::new("risk", "CRO", "skeptical");
        let mut envelope = make_envelope();
        envelope.status = SessionStatus::Debating;
        envelope.transcript.push(Turn::placeholder(&agent, 0, 3));
        let json = envelope.to_json().unwrap();

        let (restored, integrity) = SessionEnvelope::from_json(&json).unwrap();
        assert_eq!(restored.status, SessionStatus::Paused);
        assert_eq!(
            restored.transcript.last().unwrap().status(),
            TurnStatus::Interrupted
        );
        assert_eq!(integrity.warnings().len(), 2);
    }

    #[test]
    fn test_malformed_turns_dropped_and_sparse_turns_filled() {
        let value = json!({
            "version": 1,
            "id": "s-003",
            "panelId": "grid",
            "prompt": "p",
            "status": "completed",
            "totalRounds": 6,
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z",
            "transcript": [
                {"speakerId": "grid-analyst", "content": "Peak at 18:00."},
                {"content": "no speaker"},
                7,
            ],
        });
        let (envelope, integrity) = SessionEnvelope::from_value(&value).unwrap();
        assert_eq!(envelope.status, SessionStatus::Complete);
        assert_eq!(envelope.transcript.len(), 1);
        let turn = envelope.transcript.last().unwrap();
        assert_eq!(turn.display_role(), "grid-analyst");
        assert_eq!(turn.content(), "Peak at 18:00.");
        assert_eq!(integrity.warnings().len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemorySessionStore::new();
        assert!(store.is_empty().await);
        assert!(matches!(
            store.load("missing").await,
            Err(PersistenceError::NotFound(_))
        ));

        let envelope = make_envelope();
        store.save(&envelope).await.unwrap();
        let mut newer = make_envelope();
        newer.id = "s-002".to_string();
        newer.updated_at = envelope.updated_at + chrono::Duration::seconds(5);
        store.save(&newer).await.unwrap();

        let (loaded, integrity) = store.load("s-001").await.unwrap();
        assert!(integrity.is_valid());
        assert_eq!(loaded.transcript.len(), 2);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "s-002");
        assert!(listed[0].has_decision);

        assert!(store.delete("s-001").await.unwrap());
        assert!(!store.delete("s-001").await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_in_memory_list_skips_unreadable_entries() {
        let store = InMemorySessionStore::new();
        store.save(&make_envelope()).await.unwrap();
        store
            .sessions
            .write()
            .await
            .insert("broken".to_string(), "{ not json".to_string());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "s-001");
        assert!(store.load("broken").await.is_err());
    }
}
