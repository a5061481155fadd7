use std::fmt;
use std::time::Duration;

use crate::error::{AssistError, Result};

pub const API_KEY_VAR: &str = "ASSIST_API_KEY";
pub const BASE_URL_VAR: &str = "ASSIST_BASE_URL";
pub const TEXT_MODEL_VAR: &str = "ASSIST_TEXT_MODEL";
pub const VISION_MODEL_VAR: &str = "ASSIST_VISION_MODEL";
pub const MAX_TOKENS_VAR: &str = "ASSIST_MAX_TOKENS";
pub const MAX_ATTEMPTS_VAR: &str = "ASSIST_MAX_ATTEMPTS";

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_TEXT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_VISION_MODEL: &str = "qwen-vl-max";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub const TEXT_TIMEOUT: Duration = Duration::from_secs(60);
pub const VISION_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection and generation defaults shared by every assistant.
#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub max_attempts: u32,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Load the configuration from the environment.
    ///
    /// The API key has no fallback: a missing or blank `ASSIST_API_KEY` is a
    /// configuration error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AssistError::Config(format!("{API_KEY_VAR} environment variable not set"))
            })?;

        let mut config = Self::new(api_key);

        if let Some(base_url) = lookup(BASE_URL_VAR).filter(|v| !v.trim().is_empty()) {
            config.base_url = base_url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup(TEXT_MODEL_VAR).filter(|v| !v.trim().is_empty()) {
            config.text_model = model.trim().to_string();
        }
        if let Some(model) = lookup(VISION_MODEL_VAR).filter(|v| !v.trim().is_empty()) {
            config.vision_model = model.trim().to_string();
        }
        if let Some(raw) = lookup(MAX_TOKENS_VAR) {
            config.max_tokens = parse_positive(MAX_TOKENS_VAR, &raw)?;
        }
        if let Some(raw) = lookup(MAX_ATTEMPTS_VAR) {
            config.max_attempts = parse_positive(MAX_ATTEMPTS_VAR, &raw)?;
        }

        Ok(config)
    }
}

fn parse_positive(name: &str, raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AssistError::Config(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
