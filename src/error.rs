//! Error handling for the AI query pipeline
//!
//! Every failure in the pipeline collapses into [`PipelineError`]. The
//! user-visible rendering is deliberately generic (no schema, prompt or SQL
//! detail leaks to the client); the diagnostic detail belongs in server
//! logs only.

use thiserror::Error;

/// Reasons the sandbox refuses to run a generated statement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("only SELECT queries are allowed")]
    NotReadOnly,

    #[error("query contains prohibited SQL commands")]
    ProhibitedStatement,
}

/// Main error type for the query pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The caller sent something unusable (blank query).
    #[error("invalid input: {0}")]
    Input(String),

    /// The model's output survived neither the strict JSON parse nor the
    /// regex fallback. Carries the raw text for server-side diagnostics.
    #[error("could not parse AI response: {reason}")]
    Parse { reason: String, raw: String },

    /// The model answered but produced no SQL to run.
    #[error("model returned no usable query")]
    EmptyGeneration,

    /// The sandbox rejected the generated SQL before execution.
    #[error("query rejected: {0}")]
    RejectedQuery(#[from] SandboxViolation),

    /// The database refused or timed out on the statement.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// The LLM service was unreachable or returned a non-success status.
    #[error("LLM service error: {0}")]
    Upstream(String),
}

impl PipelineError {
    /// True when the failure is correctable by the caller (HTTP 400 class).
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Input(_) | Self::RejectedQuery(_))
    }

    /// The generic message shown to the end user. Never includes SQL,
    /// prompts or raw model output.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Input(_) => "Query must not be blank.",
            Self::Parse { .. } => "Invalid response from AI service.",
            Self::EmptyGeneration => "Could not generate a valid query from your request.",
            Self::RejectedQuery(_) | Self::Execution(_) | Self::Upstream(_) => {
                "Sorry, I couldn't process your query. Please try rephrasing it."
            }
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Execution(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Upstream(e.to_string())
    }
}
