//! Summaries and developer analysis
//!
//! Turns a result set into a short business-facing narrative. Insights
//! (min/max/average per numeric column, record count) are computed locally
//! first to ground the LLM call and shrink the room for hallucination; if
//! the call fails in any way, a deterministic templated sentence stands in.
//! Summary generation must never block returning the data itself.

use std::sync::Arc;

use crate::ai::prompts::TranscriptChunk;
use crate::ai::{parser, prompts, ChatOptions, LlmClient};
use crate::chat::DeveloperAnalysis;
use crate::query::QueryResult;
use crate::scope::AppScope;

pub struct SummaryGenerator {
    llm: Arc<dyn LlmClient>,
}

impl SummaryGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Business summary for a non-empty result set. Always returns some
    /// text: the LLM's summary or the deterministic fallback.
    pub async fn business_summary(
        &self,
        user_query: &str,
        result: &QueryResult,
        description: &str,
        scope: AppScope,
    ) -> Option<String> {
        if result.is_empty() {
            return None;
        }

        let insights = analyze_insights(result);
        let prompt = prompts::summary_user(user_query, description, result, &insights, scope);

        match self
            .llm
            .chat(&prompts::summary_system(), &prompt, ChatOptions::SUMMARY)
            .await
        {
            Ok(raw) => match parser::parse_summary(&raw) {
                Some(summary) => Some(summary),
                None => {
                    tracing::warn!("summary response had no summary field");
                    Some(fallback_summary(result.row_count(), description))
                }
            },
            Err(e) => {
                tracing::error!("business summary generation error: {e}");
                Some(fallback_summary(result.row_count(), description))
            }
        }
    }

    /// One-time comprehensive analysis of a single developer, cached by the
    /// caller for follow-up questions. Falls back to generic-but-correct
    /// text when the model's JSON does not parse.
    pub async fn developer_analysis(
        &self,
        developer: &str,
        result: &QueryResult,
        transcripts: &[TranscriptChunk],
    ) -> DeveloperAnalysis {
        let prompt = prompts::developer_analysis(developer, result, transcripts);
        let raw = match self
            .llm
            .chat(&prompts::analysis_system(), &prompt, ChatOptions::ANALYSIS)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("developer analysis call failed: {e}");
                return prompts::generic_analysis(developer, result.rows.first());
            }
        };

        match parse_analysis(&raw) {
            Some(analysis) => analysis,
            None => {
                tracing::error!("failed to parse analysis JSON; using generic fallback");
                prompts::generic_analysis(developer, result.rows.first())
            }
        }
    }
}

fn parse_analysis(raw: &str) -> Option<DeveloperAnalysis> {
    #[derive(serde::Deserialize)]
    struct RawAnalysis {
        performance_summary: Option<String>,
        strengths: Option<String>,
        improvements: Option<String>,
    }

    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let parsed: RawAnalysis = serde_json::from_str(cleaned).ok()?;
    Some(DeveloperAnalysis {
        summary: parsed.performance_summary?,
        strengths: parsed.strengths.unwrap_or_default(),
        improvements: parsed.improvements.unwrap_or_default(),
        generated_at: chrono::Utc::now(),
    })
}

/// Per-numeric-column range and average, as one compact line.
pub fn analyze_insights(result: &QueryResult) -> String {
    if result.is_empty() {
        return "No data".to_string();
    }

    let mut insights = Vec::new();
    let first = &result.rows[0];

    for column in &result.columns {
        if !first.get(column).map(is_numeric).unwrap_or(false) {
            continue;
        }
        let values: Vec<f64> = result
            .rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter_map(as_f64)
            .collect();
        if values.is_empty() {
            continue;
        }
        if values.len() > 1 {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            insights.push(format!(
                "{}: average {:.1}, range {}-{}",
                humanize(column),
                avg,
                trim_float(min),
                trim_float(max)
            ));
        } else {
            insights.push(format!("{}: {}", humanize(column), trim_float(values[0])));
        }
    }

    if first.contains_key("name") {
        let count = result.row_count();
        let noun = if count == 1 { "person" } else { "people" };
        insights.push(format!("{count} {noun} analyzed"));
    }

    if insights.is_empty() {
        format!("{} records", result.row_count())
    } else {
        insights.join("; ")
    }
}

/// Deterministic sentence used whenever the LLM summary is unavailable.
pub fn fallback_summary(count: usize, description: &str) -> String {
    let lowered = description.to_lowercase();
    let entity = if lowered.contains("developer") {
        if count == 1 { "developer" } else { "developers" }
    } else if lowered.contains("repositor") || lowered.contains("repo") {
        if count == 1 { "repository" } else { "repositories" }
    } else if lowered.contains("ticket") {
        if count == 1 { "ticket" } else { "tickets" }
    } else if lowered.contains("commit") {
        if count == 1 { "commit" } else { "commits" }
    } else if lowered.contains("pull request") || lowered.contains("pr") {
        if count == 1 { "pull request" } else { "pull requests" }
    } else if count == 1 {
        "result"
    } else {
        "results"
    };
    format!("Found {count} {entity}. {description}")
}

fn is_numeric(value: &serde_json::Value) -> bool {
    value.is_number()
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    value.as_f64()
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn humanize(column: &str) -> String {
    let mut out = column.replace(['_', '-'], " ");
    if let Some(first) = out.get(0..1) {
        let upper = first.to_uppercase();
        out.replace_range(0..1, &upper);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Row;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> QueryResult {
        let rows = rows
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (col, value) in columns.iter().zip(values) {
                    row.insert(col.to_string(), value);
                }
                row
            })
            .collect();
        QueryResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn insights_cover_numeric_columns() {
        let r = result(
            &["name", "total"],
            vec![
                vec![json!("Alice"), json!(40)],
                vec![json!("Bob"), json!(10)],
            ],
        );
        let insights = analyze_insights(&r);
        assert!(insights.contains("Total: average 25.0, range 10-40"));
        assert!(insights.contains("2 people analyzed"));
    }

    #[test]
    fn insights_handle_single_row() {
        let r = result(&["total"], vec![vec![json!(7)]]);
        assert_eq!(analyze_insights(&r), "Total: 7");
    }

    #[test]
    fn fallback_summary_picks_entity_noun() {
        assert_eq!(
            fallback_summary(3, "Top developers by commits"),
            "Found 3 developers. Top developers by commits"
        );
        assert_eq!(
            fallback_summary(1, "Busiest repository"),
            "Found 1 repository. Busiest repository"
        );
        assert_eq!(fallback_summary(2, "Who knows"), "Found 2 results. Who knows");
    }

    #[test]
    fn analysis_parser_handles_code_fences() {
        let raw = "```json\n{\"performance_summary\": \"Solid.\", \"strengths\": \"Focus.\", \"improvements\": \"Reviews.\"}\n```";
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.summary, "Solid.");
        assert_eq!(analysis.improvements, "Reviews.");
    }

    #[test]
    fn analysis_parser_rejects_prose() {
        assert!(parse_analysis("Here is my analysis: they are great").is_none());
    }
}
