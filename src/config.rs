//! Environment configuration
//!
//! All deployment knobs come from environment variables (a `.env` file is
//! honored via dotenvy in the server binary). Missing optional values fall
//! back to defaults; only the Anthropic API key is mandatory for LLM use.

use std::time::Duration;

/// Default Claude model, the same family the dashboard has always used.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Default caller-side timeout for LLM requests.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;

/// Server-side statement timeout applied before running generated SQL.
pub const STATEMENT_TIMEOUT_MS: u32 = 15_000;

/// Configuration for LLM access.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl AiConfig {
    /// Read configuration from the environment.
    ///
    /// `ANTHROPIC_API_KEY` is required; `ANTHROPIC_MODEL` and
    /// `LLM_TIMEOUT_SECS` are optional.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::with_key(api_key))
    }

    /// Build a config around a known API key, reading the rest from env.
    pub fn with_key(api_key: String) -> Self {
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_secs = std::env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LLM_TIMEOUT_SECS);
        Self {
            api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}
