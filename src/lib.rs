//! DevPulse - AI query pipeline for the GitHub/Jira analytics dashboard
//!
//! This crate turns natural-language questions about team activity into
//! guarded, read-only SQL against the analytics store, renders the results
//! as chart payloads and produces conversational summaries. Two tracked
//! applications ("legacy" and "pioneer") share one schema; every generated
//! query is scoped to exactly one of them.
//!
//! ## Request flow
//!
//! ```text
//! user text -> intent classifier -> [conversational answer]
//!                                -> schema context + chat context
//!                                -> LLM SQL generation -> response parser
//!                                -> sandbox -> execution -> (refinement)
//!                                -> chart formatting -> summary
//!                                -> conversation-state update
//! ```
//!
//! The HTTP surface lives in the `devpulse-web` crate; this crate holds the
//! pipeline itself plus the trait seams (`LlmClient`, `QueryExecutor`,
//! `ContextProvider`, `TranscriptSearch`) the server wires together.

// Core error handling
pub mod error;

// Environment configuration
pub mod config;

// Tenancy scope and per-tenant vocabulary tables
pub mod scope;

// Heuristic intent classification
pub mod intent;

// Session-scoped conversation state
pub mod chat;

// LLM clients, prompts, response parsing, summaries
pub mod ai;

// Schema context, SQL sandbox, query execution
pub mod query;

// Chart payload shaping
pub mod format;

// Prompt audit log
pub mod audit;

// Request orchestration
pub mod pipeline;

// Re-exports for convenience
pub use chat::ConversationState;
pub use error::{PipelineError, SandboxViolation};
pub use pipeline::{QueryPipeline, QueryRequest};
pub use scope::AppScope;
