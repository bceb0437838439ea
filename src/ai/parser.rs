//! Response parsing
//!
//! The model is instructed to return a single JSON object, but LLM output
//! is not guaranteed well-formed: wrapping quotes, escaped newlines, stray
//! prose and unescaped inner quotes all happen. Parsing is therefore
//! two-tier: a strict JSON pass, then field-specific regex extraction that
//! trades strictness for availability. The outcome is tagged so callers
//! can see which tier produced it; failure is an ordinary error value, not
//! control flow.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Chart rendering hint chosen by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Pie,
    #[default]
    Table,
    Text,
}

impl ChartType {
    /// Lenient parse; anything unrecognized renders as a table.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "bar" => ChartType::Bar,
            "pie" => ChartType::Pie,
            "text" => ChartType::Text,
            _ => ChartType::Table,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Table => "table",
            ChartType::Text => "text",
        }
    }
}

/// The typed result of SQL generation. Produced only by this parser;
/// nothing downstream handles untyped model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub description: String,
    pub chart_type: ChartType,
    /// Search terms for meeting-transcript retrieval, when the model
    /// suggests them.
    pub transcript_terms: Option<String>,
    /// Present when the model declined to generate SQL.
    pub refusal: Option<String>,
}

/// Which tier produced the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Strict(GeneratedQuery),
    Fallback(GeneratedQuery),
}

impl ParseOutcome {
    pub fn into_query(self) -> GeneratedQuery {
        match self {
            ParseOutcome::Strict(q) | ParseOutcome::Fallback(q) => q,
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback(_))
    }
}

/// Raw JSON shape as the model emits it.
#[derive(Debug, Default, Deserialize)]
struct RawResponse {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    chart_type: Option<String>,
    #[serde(default)]
    transcript_search_terms: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

static SQL_RE: Lazy<Regex> = Lazy::new(|| field_regex("sql"));
static DESCRIPTION_RE: Lazy<Regex> = Lazy::new(|| field_regex("description"));
static CHART_TYPE_RE: Lazy<Regex> = Lazy::new(|| field_regex("chart_type"));
static SUMMARY_RE: Lazy<Regex> = Lazy::new(|| field_regex("summary"));

/// `"field": "..."` tolerant of escaped quotes and newlines in the value.
fn field_regex(field: &str) -> Regex {
    Regex::new(&format!(r#"(?s)"{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).expect("field regex")
}

/// Strip one layer of wrapping quotes and undo common escape sequences.
fn clean(raw: &str) -> String {
    let mut text = raw.trim();
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = &text[1..text.len() - 1];
    }
    // Strip markdown code fences the model sometimes adds despite the rules.
    let text = text
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    text.replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

fn unescape_field(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn from_raw(raw: RawResponse) -> GeneratedQuery {
    GeneratedQuery {
        sql: raw.sql.unwrap_or_default().trim().to_string(),
        description: raw
            .description
            .unwrap_or_else(|| "Query Results".to_string()),
        chart_type: raw
            .chart_type
            .map(|c| ChartType::parse(&c))
            .unwrap_or_default(),
        transcript_terms: raw.transcript_search_terms,
        refusal: raw.error,
    }
}

/// Parse a SQL-generation response. Strict JSON first, regex fallback
/// second; error only when neither recovers a single field.
pub fn parse_generated(raw: &str) -> Result<ParseOutcome, PipelineError> {
    if raw.trim().is_empty() {
        return Err(PipelineError::Parse {
            reason: "empty model response".to_string(),
            raw: raw.to_string(),
        });
    }

    let cleaned = clean(raw);

    match serde_json::from_str::<RawResponse>(&cleaned) {
        Ok(parsed) => Ok(ParseOutcome::Strict(from_raw(parsed))),
        Err(strict_err) => {
            tracing::debug!("strict JSON parse failed, trying regex fallback: {strict_err}");
            let mut recovered = RawResponse::default();
            let mut hits = 0;
            if let Some(c) = SQL_RE.captures(&cleaned) {
                recovered.sql = Some(unescape_field(&c[1]));
                hits += 1;
            }
            if let Some(c) = DESCRIPTION_RE.captures(&cleaned) {
                recovered.description = Some(unescape_field(&c[1]));
                hits += 1;
            }
            if let Some(c) = CHART_TYPE_RE.captures(&cleaned) {
                recovered.chart_type = Some(unescape_field(&c[1]));
                hits += 1;
            }
            if hits > 0 {
                Ok(ParseOutcome::Fallback(from_raw(recovered)))
            } else {
                Err(PipelineError::Parse {
                    reason: strict_err.to_string(),
                    raw: raw.to_string(),
                })
            }
        }
    }
}

/// Parse a summary-style response (`{"summary": "..."}`); returns None
/// rather than failing, because summaries are best-effort.
pub fn parse_summary(raw: &str) -> Option<String> {
    let cleaned = clean(raw);
    if let Ok(parsed) = serde_json::from_str::<RawResponse>(&cleaned) {
        if let Some(summary) = parsed.summary {
            return Some(summary);
        }
    }
    SUMMARY_RE
        .captures(&cleaned)
        .map(|c| unescape_field(&c[1]))
}
