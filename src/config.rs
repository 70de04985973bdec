//! Pipeline configuration.
//!
//! Defaults, then an optional JSON file, then `FEEDBACK_*` environment
//! variables. Provider credentials stay with the gateway (`OPENROUTER_*`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::report::types::Tier;

pub const DEFAULT_MODEL: &str = "openai/gpt-4.1-mini";
pub const DEFAULT_FALLBACK_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Generation budget per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputTokenLimits {
    pub standard: u32,
    pub premium: u32,
}

impl Default for OutputTokenLimits {
    fn default() -> Self {
        Self {
            standard: 2048,
            premium: 4096,
        }
    }
}

impl OutputTokenLimits {
    pub fn for_tier(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Standard => self.standard,
            Tier::Premium => self.premium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: String,
    /// Used once when the provider rejects `model`. `None` disables fallback.
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: OutputTokenLimits,
    /// Ceiling on a single generation call.
    pub call_timeout_secs: u64,
    /// Ceiling on a single progress-frame write.
    pub transport_timeout_secs: u64,
    /// `None` keeps every artifact for the process lifetime.
    pub cache_capacity: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            fallback_model: Some(DEFAULT_FALLBACK_MODEL.to_string()),
            temperature: 0.7,
            max_output_tokens: OutputTokenLimits::default(),
            call_timeout_secs: 180,
            transport_timeout_secs: 10,
            cache_capacity: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|var| std::env::var(var).ok())
    }

    /// Overlay `FEEDBACK_*` values from `lookup`.
    pub fn with_vars(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(model) = get("FEEDBACK_MODEL") {
            self.model = model;
        }
        if let Some(fallback) = get("FEEDBACK_FALLBACK_MODEL") {
            self.fallback_model = if fallback.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(fallback)
            };
        }
        if let Some(raw) = get("FEEDBACK_CALL_TIMEOUT_SECONDS") {
            self.call_timeout_secs = parse_var("FEEDBACK_CALL_TIMEOUT_SECONDS", raw)?;
        }
        if let Some(raw) = get("FEEDBACK_TRANSPORT_TIMEOUT_SECONDS") {
            self.transport_timeout_secs = parse_var("FEEDBACK_TRANSPORT_TIMEOUT_SECONDS", raw)?;
        }
        if let Some(raw) = get("FEEDBACK_CACHE_CAPACITY") {
            self.cache_capacity = Some(parse_var("FEEDBACK_CACHE_CAPACITY", raw)?);
        }
        Ok(self)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
