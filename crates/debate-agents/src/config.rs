use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::debate::{SchedulerConfig, DEFAULT_AUTOSAVE_DEBOUNCE, DEFAULT_TURN_DELAY};
use serde::Deserialize;

const DEFAULT_API_URL: &str = "http://localhost:8787/api";
const DEFAULT_SESSIONS_DIR: &str = ".debate-sessions";
const DEFAULT_TURN_TIMEOUT_SECS: u64 = 120;

/// Driver configuration.
///
/// Defaults come from `DEBATE_*` environment variables; a TOML file given
/// with `--config` overrides whatever it sets.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the generation backend (`DEBATE_API_URL`).
    pub api_url: String,
    /// Bearer token for the backend (`DEBATE_API_KEY`).
    pub api_key: Option<String>,
    /// Use the offline mock port instead of HTTP (`DEBATE_MOCK`).
    pub mock: bool,
    /// Per-turn bound; `None` when `DEBATE_TURN_TIMEOUT_SECS=0`.
    pub turn_timeout: Option<Duration>,
    /// Pause between turns (`DEBATE_TURN_DELAY_MS`).
    pub turn_delay: Duration,
    /// Autosave debounce window (`DEBATE_AUTOSAVE_MS`).
    pub autosave_debounce: Duration,
    /// Where session files live (`DEBATE_SESSIONS_DIR`).
    pub sessions_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Keys accepted in the TOML overlay. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    api_key: Option<String>,
    mock: Option<bool>,
    turn_timeout_secs: Option<u64>,
    turn_delay_ms: Option<u64>,
    autosave_ms: Option<u64>,
    sessions_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build from an arbitrary variable source. Unparsable values fall back
    /// to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let timeout_secs = lookup("DEBATE_TURN_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TURN_TIMEOUT_SECS);

        Self {
            api_url: lookup("DEBATE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            api_key: lookup("DEBATE_API_KEY").filter(|k| !k.trim().is_empty()),
            mock: lookup("DEBATE_MOCK").map(|v| truthy(&v)).unwrap_or(false),
            turn_timeout: secs_to_timeout(timeout_secs),
            turn_delay: millis("DEBATE_TURN_DELAY_MS", DEFAULT_TURN_DELAY),
            autosave_debounce: millis("DEBATE_AUTOSAVE_MS", DEFAULT_AUTOSAVE_DEBOUNCE),
            sessions_dir: lookup("DEBATE_SESSIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSIONS_DIR)),
        }
    }

    /// Environment defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::default();
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                config.overlay_toml(&content)
            }
            None => Ok(config),
        }
    }

    /// Apply the keys set in a TOML document on top of `self`.
    pub fn overlay_toml(mut self, content: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        if let Some(url) = file.api_url {
            self.api_url = url;
        }
        if let Some(key) = file.api_key {
            self.api_key = Some(key).filter(|k| !k.trim().is_empty());
        }
        if let Some(mock) = file.mock {
            self.mock = mock;
        }
        if let Some(secs) = file.turn_timeout_secs {
            self.turn_timeout = secs_to_timeout(secs);
        }
        if let Some(ms) = file.turn_delay_ms {
            self.turn_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.autosave_ms {
            self.autosave_debounce = Duration::from_millis(ms);
        }
        if let Some(dir) = file.sessions_dir {
            self.sessions_dir = dir;
        }
        Ok(self)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_turn_delay(self.turn_delay)
            .with_turn_timeout(self.turn_timeout)
    }
}

fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
