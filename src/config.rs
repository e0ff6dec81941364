use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::kernel::annotator::DEFAULT_OBSERVE_PROMPT;

pub const CONFIG_PATH_VAR: &str = "LOOKOUT_CONFIG";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a quiet observer watching the user's screen. \
You receive periodic frames. Describe them briefly and precisely. \
When asked a question, answer from what you have observed so far.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LookoutConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub annotate_interval_ms: u64,
    pub access_deadline_ms: u64,
    pub request_timeout_ms: u64,
    pub max_frame_edge: u32,
    pub jpeg_quality: u8,
    pub observe_prompt: String,
    pub system_prompt: String,
}

impl Default for LookoutConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model: "default".to_string(),
            api_key: None,
            annotate_interval_ms: 1_000,
            access_deadline_ms: 30_000,
            request_timeout_ms: 60_000,
            max_frame_edge: 768,
            jpeg_quality: 70,
            observe_prompt: DEFAULT_OBSERVE_PROMPT.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl LookoutConfig {
    /// Defaults, then the JSON file named by `LOOKOUT_CONFIG`, then `LOOKOUT_*` variables.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LOOKOUT_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("LOOKOUT_MODEL") {
            self.model = v;
        }
        if let Some(v) = lookup("LOOKOUT_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("LOOKOUT_INTERVAL_MS") {
            self.annotate_interval_ms = v.parse().context("LOOKOUT_INTERVAL_MS must be an integer")?;
        }
        if let Some(v) = lookup("LOOKOUT_DEADLINE_MS") {
            self.access_deadline_ms = v.parse().context("LOOKOUT_DEADLINE_MS must be an integer")?;
        }
        if let Some(v) = lookup("LOOKOUT_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = v
                .parse()
                .context("LOOKOUT_REQUEST_TIMEOUT_MS must be an integer")?;
        }
        if let Some(v) = lookup("LOOKOUT_MAX_FRAME_EDGE") {
            self.max_frame_edge = v.parse().context("LOOKOUT_MAX_FRAME_EDGE must be an integer")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.annotate_interval_ms == 0 {
            bail!("annotate_interval_ms must be positive");
        }
        if self.access_deadline_ms == 0 {
            bail!("access_deadline_ms must be positive");
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be positive");
        }
        if self.max_frame_edge == 0 {
            bail!("max_frame_edge must be positive");
        }
        if self.base_url.trim().is_empty() {
            bail!("base_url must not be empty");
        }
        Ok(())
    }

    pub fn annotate_interval(&self) -> Duration {
        Duration::from_millis(self.annotate_interval_ms)
    }

    pub fn access_deadline(&self) -> Duration {
        Duration::from_millis(self.access_deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
