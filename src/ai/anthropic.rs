//! Anthropic Client
//!
//! LLM client implementation for the Anthropic Claude Messages API.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::AiConfig;

use super::{ChatOptions, LlmClient};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client.
#[derive(Clone)]
pub struct AnthropicClient {
    config: AiConfig,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a client from a prepared config.
    pub fn new(config: AiConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(anyhow!("Anthropic API key must not be empty"));
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(AiConfig::from_env()?)
    }

    async fn call_api(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: ChatOptions,
    ) -> Result<String> {
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": &self.config.model,
                "max_tokens": opts.max_tokens,
                "temperature": opts.temperature,
                "system": system_prompt,
                "messages": [{"role": "user", "content": user_prompt}]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Anthropic API error {status}: {body}");
            return Err(anyhow!("Anthropic API error {status}"));
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
        }

        let api_response: ApiResponse = response.json().await?;
        api_response
            .content
            .first()
            .and_then(|c| c.text.as_deref())
            .map(|text| text.trim().to_string())
            .ok_or_else(|| anyhow!("empty response from Anthropic"))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: ChatOptions,
    ) -> Result<String> {
        self.call_api(system_prompt, user_prompt, opts).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MODEL;

    #[test]
    fn new_client_uses_configured_model() {
        let client = AnthropicClient::new(AiConfig::with_key("test-key".into())).unwrap();
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(AnthropicClient::new(AiConfig::with_key(String::new())).is_err());
    }
}
