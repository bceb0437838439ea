//! LLM integration
//!
//! One trait seam ([`LlmClient`]) between the pipeline and the model
//! provider, a Claude Messages API implementation behind it, the prompt
//! builders, and the two-tier response parser. The pipeline varies token
//! budget and temperature per call (SQL generation wants determinism,
//! conversational answers a little warmth), so both travel in
//! [`ChatOptions`].

pub mod anthropic;
pub mod parser;
pub mod prompts;
pub mod summary;

pub use anthropic::AnthropicClient;
pub use parser::{GeneratedQuery, ParseOutcome};
pub use summary::SummaryGenerator;

use anyhow::Result;
use async_trait::async_trait;

/// Per-call generation knobs.
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatOptions {
    /// SQL generation: near-deterministic, room for a full statement.
    pub const SQL: ChatOptions = ChatOptions {
        max_tokens: 1000,
        temperature: 0.1,
    };

    /// Business summaries: short and tight.
    pub const SUMMARY: ChatOptions = ChatOptions {
        max_tokens: 300,
        temperature: 0.1,
    };

    /// Conversational answers: a little more latitude.
    pub const CONVERSATIONAL: ChatOptions = ChatOptions {
        max_tokens: 1000,
        temperature: 0.3,
    };

    /// Full developer analysis: three structured paragraphs.
    pub const ANALYSIS: ChatOptions = ChatOptions {
        max_tokens: 2000,
        temperature: 0.2,
    };
}

/// Unified LLM client interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Call the model with system + user prompts, returning the raw text.
    async fn chat(&self, system_prompt: &str, user_prompt: &str, opts: ChatOptions)
        -> Result<String>;

    /// Model identifier for logging and `processing_info`.
    fn model_name(&self) -> &str;
}
