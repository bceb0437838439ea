//! Conversation state
//!
//! Each chat session owns one [`ConversationState`]: a bounded FIFO of
//! recent exchanges, the entities the conversation is currently "about"
//! (used to resolve pronouns in follow-ups), and cached per-developer
//! analyses. The value is explicit: callers pass it into the pipeline and
//! the web layer keeps it in a keyed store; nothing here is global.
//!
//! Between requests only a size-bounded [`Snapshot`] is persisted: the
//! last 3 exchanges and the first 3 focus entries per category. That trades
//! context fidelity for storage cost at the session boundary.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::intent::FollowupTopic;
use crate::query::Row;
use crate::scope::AppScope;

/// In-memory history cap; the oldest exchange is evicted first.
pub const HISTORY_CAP: usize = 5;

/// Max identifiers retained per focus category.
pub const FOCUS_CAP: usize = 5;

/// How many exchanges / focus entries survive serialization to a snapshot.
const SNAPSHOT_HISTORY: usize = 3;
const SNAPSHOT_FOCUS: usize = 3;

/// How much of an assistant reply is replayed into later prompts.
const REPLY_EXCERPT: usize = 150;

/// Whether an exchange carried data or plain conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    DataQuery,
    Conversational,
}

/// One user/assistant turn. Immutable once appended; only FIFO eviction
/// mutates the containing sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub user_query: String,
    pub ai_response: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ExchangeKind,
}

/// Entities extracted from prior results, per category, most recent first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FocusEntities {
    pub developers: Vec<String>,
    pub repositories: Vec<String>,
    pub tickets: Vec<String>,
    pub pull_requests: Vec<String>,
}

impl FocusEntities {
    pub fn is_empty(&self) -> bool {
        self.developers.is_empty()
            && self.repositories.is_empty()
            && self.tickets.is_empty()
            && self.pull_requests.is_empty()
    }
}

/// Cached three-section analysis for one developer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperAnalysis {
    pub summary: String,
    pub strengths: String,
    pub improvements: String,
    pub generated_at: DateTime<Utc>,
}

impl DeveloperAnalysis {
    /// The section a follow-up question asks for.
    pub fn section(&self, topic: FollowupTopic) -> &str {
        match topic {
            FollowupTopic::Strengths => &self.strengths,
            FollowupTopic::Improvements => &self.improvements,
            FollowupTopic::Summary => &self.summary,
        }
    }
}

/// Session-scoped conversation memory.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    history: VecDeque<Exchange>,
    focus: FocusEntities,
    analyses: HashMap<String, DeveloperAnalysis>,
}

/// Size-bounded serialized form of [`ConversationState`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub history: Vec<Exchange>,
    pub focus: FocusEntities,
    pub analyses: HashMap<String, DeveloperAnalysis>,
}

static CAPITALIZED_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\b").unwrap());

/// Capitalized words that are sentence furniture, not names.
const NAME_STOPWORDS: &[&str] = &[
    "What", "Who", "How", "Why", "When", "Where", "Should", "Could", "Would", "Can", "Tell",
    "Show", "The", "They", "Their", "She", "He", "His", "Her",
];

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a data-query turn.
    pub fn add_data_exchange(&mut self, user_query: &str, ai_response: &str) {
        self.push(Exchange {
            user_query: user_query.to_string(),
            ai_response: ai_response.to_string(),
            timestamp: Utc::now(),
            kind: ExchangeKind::DataQuery,
        });
    }

    /// Record a conversational turn.
    pub fn add_conversational_exchange(&mut self, user_query: &str, ai_response: &str) {
        self.push(Exchange {
            user_query: user_query.to_string(),
            ai_response: ai_response.to_string(),
            timestamp: Utc::now(),
            kind: ExchangeKind::Conversational,
        });
    }

    fn push(&mut self, exchange: Exchange) {
        self.history.push_back(exchange);
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Exchange> {
        self.history.iter()
    }

    pub fn focus(&self) -> &FocusEntities {
        &self.focus
    }

    /// Anything worth replaying into a prompt?
    pub fn has_context(&self) -> bool {
        !self.history.is_empty() || !self.focus.is_empty()
    }

    /// Drop everything (the reset-conversation endpoint).
    pub fn clear(&mut self) {
        self.history.clear();
        self.focus = FocusEntities::default();
        self.analyses.clear();
    }

    /// Pull candidate focus entities out of result rows, recognized by key
    /// name. New entities win over old ones; each category is capped.
    pub fn absorb_results(&mut self, rows: &[Row]) {
        let Some(first) = rows.first() else { return };

        if has_any_key(first, &["name", "developer_name", "developer"]) {
            let names = collect_values(rows, &["name", "developer_name", "developer"]);
            merge_focus(&mut self.focus.developers, names);
        }
        if has_any_key(first, &["repository_name", "full_name"]) {
            let names = collect_values(rows, &["repository_name", "full_name"]);
            merge_focus(&mut self.focus.repositories, names);
        }
        if has_any_key(first, &["key", "title"]) {
            let names = collect_values(rows, &["key", "title"]);
            merge_focus(&mut self.focus.tickets, names);
        }
        if first.contains_key("number") {
            let prs: Vec<String> = rows
                .iter()
                .filter_map(|row| row.get("number"))
                .filter(|v| !v.is_null())
                .map(|v| format!("PR #{}", display_value(v)))
                .collect();
            merge_focus(&mut self.focus.pull_requests, prs);
        }
    }

    /// Assemble the conversation block replayed into LLM prompts: the last
    /// few turns plus the entities in focus and a pronoun hint.
    pub fn build_prompt_context(&self, scope: AppScope) -> String {
        if !self.has_context() {
            return String::new();
        }

        let mut parts = vec![
            "=== CONVERSATION CONTEXT ===".to_string(),
            format!("App Type: {}", scope.as_str()),
            String::new(),
        ];

        if !self.history.is_empty() {
            parts.push("Recent conversation:".to_string());
            for exchange in self.history.iter().rev().take(3).rev() {
                parts.push(format!("User: {}", exchange.user_query));
                parts.push(format!(
                    "Assistant: {}...",
                    excerpt(&exchange.ai_response, REPLY_EXCERPT)
                ));
                parts.push(String::new());
            }
        }

        if !self.focus.developers.is_empty() {
            parts.push(format!(
                "Developers in focus: {}",
                self.focus.developers.join(", ")
            ));
        }
        if !self.focus.repositories.is_empty() {
            parts.push(format!(
                "Repositories in focus: {}",
                self.focus.repositories.join(", ")
            ));
        }
        if !self.focus.tickets.is_empty() {
            parts.push(format!("Recent tickets: {}", self.focus.tickets.join(", ")));
        }
        if !self.focus.pull_requests.is_empty() {
            parts.push(format!(
                "Recent pull requests: {}",
                self.focus.pull_requests.join(", ")
            ));
        }

        parts.push(String::new());
        parts.push(
            "When the user uses pronouns (he/she/they/their), they likely refer to the entities above."
                .to_string(),
        );
        parts.push("=== END CONTEXT ===".to_string());
        parts.join("\n")
    }

    /// Resolve which developer an utterance refers to: an explicit
    /// capitalized name wins; otherwise a pronoun falls back to the most
    /// recent developer in focus.
    pub fn resolve_developer(&self, utterance: &str) -> Option<String> {
        for m in CAPITALIZED_NAME_RE.find_iter(utterance) {
            if !NAME_STOPWORDS.contains(&m.as_str()) {
                return Some(m.as_str().to_string());
            }
        }
        if crate::intent::is_followup(utterance) || utterance.to_lowercase().contains("they") {
            return self.focus.developers.first().cloned();
        }
        None
    }

    /// Cache a generated analysis under the developer's normalized name.
    pub fn store_analysis(&mut self, developer: &str, analysis: DeveloperAnalysis) {
        self.analyses.insert(developer.to_lowercase(), analysis);
    }

    pub fn analysis_for(&self, developer: &str) -> Option<&DeveloperAnalysis> {
        self.analyses.get(&developer.to_lowercase())
    }

    /// Serialize to the bounded form kept between requests.
    pub fn to_snapshot(&self) -> Snapshot {
        let skip = self.history.len().saturating_sub(SNAPSHOT_HISTORY);
        Snapshot {
            history: self.history.iter().skip(skip).cloned().collect(),
            focus: FocusEntities {
                developers: truncated(&self.focus.developers),
                repositories: truncated(&self.focus.repositories),
                tickets: truncated(&self.focus.tickets),
                pull_requests: truncated(&self.focus.pull_requests),
            },
            analyses: self.analyses.clone(),
        }
    }

    /// Rehydrate from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = Self {
            history: VecDeque::new(),
            focus: snapshot.focus,
            analyses: snapshot.analyses,
        };
        for exchange in snapshot.history {
            state.push(exchange);
        }
        state
    }
}

fn truncated(entries: &[String]) -> Vec<String> {
    entries.iter().take(SNAPSHOT_FOCUS).cloned().collect()
}

fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn has_any_key(row: &Row, keys: &[&str]) -> bool {
    keys.iter().any(|k| row.contains_key(*k))
}

fn collect_values(rows: &[Row], keys: &[&str]) -> Vec<String> {
    let mut seen = Vec::new();
    for row in rows {
        for key in keys {
            if let Some(value) = row.get(*key) {
                if !value.is_null() {
                    let text = display_value(value);
                    if !text.is_empty() && !seen.contains(&text) {
                        seen.push(text);
                    }
                    break;
                }
            }
        }
    }
    seen
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Prepend new entities, keep prior ones that still fit, cap the list.
fn merge_focus(existing: &mut Vec<String>, fresh: Vec<String>) {
    if fresh.is_empty() {
        return;
    }
    let mut merged = fresh;
    for old in existing.drain(..) {
        if !merged.contains(&old) {
            merged.push(old);
        }
    }
    merged.truncate(FOCUS_CAP);
    *existing = merged;
}
