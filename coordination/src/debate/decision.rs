//! Decision model and the Decision Synthesizer.
//!
//! Synthesis is one non-streaming request over the full transcript. The
//! raw response is unwrapped from any code fence and parsed leniently;
//! when nothing usable comes back, a static fallback decision is returned
//! instead. Either way `actions`, `risks` and `metrics` are always present.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::port::{DecisionRequest, GenerationPort};
use super::transcript::Transcript;

/// T-shirt effort estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Effort {
    #[serde(rename = "S")]
    Small,
    #[default]
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "L")]
    Large,
}

impl Effort {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().chars().next()? {
            'S' => Some(Self::Small),
            'M' => Some(Self::Medium),
            'L' => Some(Self::Large),
            _ => None,
        }
    }
}

/// Expected impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Impact {
    #[serde(rename = "L")]
    Low,
    #[default]
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "H")]
    High,
}

impl Impact {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().chars().next()? {
            'L' => Some(Self::Low),
            'M' => Some(Self::Medium),
            'H' => Some(Self::High),
            _ => None,
        }
    }
}

/// One recommended action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionAction {
    pub title: String,
    pub owner: String,
    pub effort: Effort,
    pub impact: Impact,
    pub cost_range: String,
    pub timeline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Structured outcome of a debate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub title: String,
    pub rationale: String,
    #[serde(default)]
    pub actions: Vec<DecisionAction>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl Decision {
    /// Build a decision from an arbitrary JSON value.
    ///
    /// Returns `None` unless `value` is an object. Missing or wrong-typed
    /// fields fall back to empty values; list fields are never absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            title: str_field(value, "title"),
            rationale: str_field(value, "rationale"),
            actions: obj
                .get("actions")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(action_from_value).collect())
                .unwrap_or_default(),
            risks: string_list(obj.get("risks")),
            metrics: string_list(obj.get("metrics")),
        })
    }

    /// The agreed static decision used when synthesis yields nothing usable.
    pub fn fallback() -> Self {
        Self {
            title: "Proceed with a staged, low-regret plan".to_string(),
            rationale: "The panel could not produce a structured recommendation, so this \
                        default favours reversible steps that hold up under every position \
                        raised in the debate."
                .to_string(),
            actions: vec![
                DecisionAction {
                    title: "Baseline current consumption and emissions".to_string(),
                    owner: "Operations".to_string(),
                    effort: Effort::Small,
                    impact: Impact::Medium,
                    cost_range: "$0–$10k".to_string(),
                    timeline: "2–4 weeks".to_string(),
                    notes: Some("Needed before any target can be tracked.".to_string()),
                },
                DecisionAction {
                    title: "Shift flexible load to low-intensity hours".to_string(),
                    owner: "Facilities".to_string(),
                    effort: Effort::Medium,
                    impact: Impact::Medium,
                    cost_range: "$10k–$50k".to_string(),
                    timeline: "1–3 months".to_string(),
                    notes: None,
                },
                DecisionAction {
                    title: "Re-run the debate with the measured baseline".to_string(),
                    owner: "Sustainability".to_string(),
                    effort: Effort::Small,
                    impact: Impact::High,
                    cost_range: "$0".to_string(),
                    timeline: "Next quarter".to_string(),
                    notes: None,
                },
            ],
            risks: vec![
                "Recommendation is generic and not tailored to the debate".to_string(),
                "Baseline data may be incomplete".to_string(),
            ],
            metrics: vec![
                "Share of load served in low-intensity hours".to_string(),
                "Monthly emissions versus baseline".to_string(),
            ],
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn action_from_value(value: &Value) -> Option<DecisionAction> {
    value.as_object()?;
    let notes = str_field(value, "notes");
    Some(DecisionAction {
        title: str_field(value, "title"),
        owner: str_field(value, "owner"),
        effort: value
            .get("effort")
            .and_then(Value::as_str)
            .and_then(Effort::parse)
            .unwrap_or_default(),
        impact: value
            .get("impact")
            .and_then(Value::as_str)
            .and_then(Impact::parse)
            .unwrap_or_default(),
        cost_range: str_field(value, "costRange"),
        timeline: str_field(value, "timeline"),
        notes: (!notes.is_empty()).then_some(notes),
    })
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?[ \t]*```")
            .expect("fence pattern is valid")
    })
}

/// Strip a surrounding Markdown code fence, if any.
///
/// Text outside the first fenced block is discarded, so chatter before or
/// after the JSON does not break parsing.
pub fn strip_code_fences(raw: &str) -> &str {
    match fence_regex().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}

/// Parse a raw backend response into a decision.
pub fn parse_decision(raw: &str) -> Option<Decision> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(body).ok()?;
    Decision::from_value(&value)
}

/// Where a synthesized decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Generated,
    Fallback,
}

/// A decision plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub decision: Decision,
    pub source: DecisionSource,
}

/// Issues the one-shot decision request and normalises its result.
#[derive(Clone)]
pub struct DecisionSynthesizer {
    port: Arc<dyn GenerationPort>,
    timeout: Option<Duration>,
}

impl DecisionSynthesizer {
    pub fn new(port: Arc<dyn GenerationPort>) -> Self {
        Self {
            port,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Always yields a complete decision; backend and parse failures fall
    /// back to [`Decision::fallback`].
    pub async fn synthesize(&self, prompt: &str, transcript: &Transcript) -> Synthesis {
        let request = DecisionRequest {
            prompt: prompt.to_string(),
            transcript: transcript.clone(),
        };

        let call = self.port.complete_decision(request);
        let response = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "decision request timed out");
                    return Self::fallback();
                }
            },
            None => call.await,
        };

        match response {
            Ok(raw) => match parse_decision(&raw) {
                Some(decision) => {
                    info!(
                        actions = decision.actions.len(),
                        risks = decision.risks.len(),
                        "decision synthesized"
                    );
                    Synthesis {
                        decision,
                        source: DecisionSource::Generated,
                    }
                }
                None => {
                    warn!(len = raw.len(), "unparsable decision response; using fallback");
                    Self::fallback()
                }
            },
            Err(err) => {
                warn!(error = %err, "decision request failed; using fallback");
                Self::fallback()
            }
        }
    }

    fn fallback() -> Synthesis {
        Synthesis {
            decision: Decision::fallback(),
            source: DecisionSource::Fallback,
        }
    }
}
