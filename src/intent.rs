//! Intent classification
//!
//! A cheap keyword pre-filter decides whether an utterance needs SQL at all
//! or is small-talk/advice that a direct LLM answer covers. Deliberately a
//! heuristic, not a model: misclassification costs one slightly-off answer,
//! while the filter saves an LLM round-trip on every conversational turn.
//!
//! The follow-up detector routes "what should they improve on" style
//! questions to the cached per-developer analysis before any LLM call.

use once_cell::sync::Lazy;
use regex::Regex;

/// What kind of handling an utterance needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Needs SQL generation and execution.
    DataQuery,
    /// Answered directly by the LLM, no SQL.
    Conversational,
}

/// Which slice of a stored developer analysis a follow-up asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowupTopic {
    Strengths,
    Improvements,
    Summary,
}

/// Substrings that mark an utterance as a data question. Matched
/// case-insensitively anywhere in the text.
const DATA_KEYWORDS: &[&str] = &[
    // verbs of retrieval
    "show", "list", "count", "how many", "top", "most", "highest", "best",
    "compare", "average", "total",
    // entities
    "commit", "pull request", "prs", "ticket", "repositor", "developer",
    "issue", "merge",
    // time phrasing
    "today", "yesterday", "week", "month", "day", "quarter", "year",
    "last", "recent",
];

static PRONOUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(he|she|they|him|her|his|their)\b").unwrap());

static IMPROVEMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)improve|better|enhance|develop|grow|work on|focus on").unwrap());

static STRENGTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)strength|strong|good at|excel|best|strong point").unwrap());

/// Classify an utterance. Any data keyword hit means a data query.
pub fn classify(utterance: &str) -> Intent {
    let lowered = utterance.to_lowercase();
    if DATA_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        Intent::DataQuery
    } else {
        Intent::Conversational
    }
}

/// True when the utterance is a pronoun-based follow-up about a person's
/// strengths or improvement areas, answerable from a stored analysis.
pub fn is_followup(utterance: &str) -> bool {
    PRONOUN_RE.is_match(utterance)
        && (IMPROVEMENT_RE.is_match(utterance) || STRENGTH_RE.is_match(utterance))
}

/// Which section of the stored analysis the follow-up wants.
pub fn followup_topic(utterance: &str) -> FollowupTopic {
    if IMPROVEMENT_RE.is_match(utterance) {
        FollowupTopic::Improvements
    } else if STRENGTH_RE.is_match(utterance) {
        FollowupTopic::Strengths
    } else {
        FollowupTopic::Summary
    }
}
