//! Prompt assembly
//!
//! Every system prompt the pipeline sends lives here, built from the
//! tenancy scope, the live data context and (when present) conversation
//! context. The SQL prompt is the load-bearing one: it carries the schema,
//! the mandatory tenancy predicate, the look-back and LIMIT conventions,
//! the ticket-status canonicalization and the strict JSON output contract.

use crate::chat::DeveloperAnalysis;
use crate::query::{QueryResult, Row};
use crate::scope::AppScope;

/// One retrieved meeting-transcript excerpt.
#[derive(Debug, Clone)]
pub struct TranscriptChunk {
    pub text: String,
    pub meeting_date: Option<chrono::NaiveDate>,
}

/// Render the colloquial-term to literal-status mapping for the prompt.
fn status_mapping(scope: AppScope) -> String {
    scope
        .ticket_status_groups()
        .iter()
        .map(|group| {
            let terms = group
                .terms
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(" or ");
            let statuses = group
                .statuses
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("  - {terms} tickets = status IN ({statuses})")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for SQL generation.
pub fn sql_generation(
    scope: AppScope,
    schema_context: &str,
    conversation_context: &str,
    transcripts: &[TranscriptChunk],
) -> String {
    let app_type = scope.as_str();
    let display = scope.display_name();
    let mut parts: Vec<String> = Vec::new();

    if !conversation_context.is_empty() {
        parts.push(conversation_context.to_string());
        parts.push(String::new());
    }

    if !transcripts.is_empty() {
        parts.push("=== RELEVANT MEETING TRANSCRIPTS ===".to_string());
        for (i, chunk) in transcripts.iter().enumerate() {
            parts.push(format!("Transcript {}:", i + 1));
            if let Some(date) = chunk.meeting_date {
                parts.push(format!("Meeting Date: {date}"));
            }
            parts.push(format!("Content: {}", head(&chunk.text, 800)));
            parts.push(String::new());
        }
    }

    parts.push(format!(
        r#"You are a SQL query generator for the {display} GitHub and Jira analytics dashboard.

IMPORTANT: Always respond with valid JSON only. No other text.

{schema_context}

Database Tables:
- developers (id, name, github_username, jira_username, email, app_type)
- repositories (id, name, full_name, owner, language, app_type)
- commits (id, sha, message, developer_id, repository_id, committed_at, additions, deletions, app_type)
- pull_requests (id, number, title, state, developer_id, repository_id, opened_at, closed_at, merged_at, app_type)
- tickets (id, key, title, status, priority, developer_id, created_at_jira, updated_at_jira, app_type)

CRITICAL FILTERING RULE:
- ALWAYS add "app_type = '{app_type}'" to ALL table references
- This ensures you only query {display} app data

SQL CONSTRAINTS:
- FORBIDDEN: CTEs, nested subqueries, CASE WHEN, window functions
- ONLY use: SELECT, FROM, JOIN, LEFT JOIN, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT

Rules:
1. ONLY SELECT queries - never INSERT/UPDATE/DELETE
2. Always JOIN with developers table to show names, not IDs
3. ALWAYS filter by app_type = '{app_type}' for ALL tables
4. Apply a rolling 30-day time filter (e.g. committed_at >= NOW() - INTERVAL '30 days')
   unless the user names a different window or asks for all time
5. Add LIMIT 10 for most queries, but LIMIT 1 for "the most", "highest", "top", "best"
   (singular requests); no LIMIT for single-value aggregates
6. Order results meaningfully, typically descending by counts or dates
7. For single-value aggregates set "chart_type" to "table"; use "bar" or "pie" for
   grouped multi-row results

TICKET STATUS MAPPING:
  When users ask about ticket statuses, use these exact mappings based on our actual status values:
{status_map}

  NEVER use single status values or assume status names - always use the appropriate IN clause.

Response Format (JSON only):
{{"sql": "SELECT ...", "description": "Human description", "chart_type": "bar"}}

Chart types:
- "bar" for counts/numbers with multiple categories
- "pie" for categorical distribution data
- "table" for lists or single-value aggregates

Only return {{"error": "Please rephrase your query"}} if the query asks for data
modification, system information not in these tables, or is truly impossible.

Respond with ONLY the JSON. Nothing before {{, nothing after }}"#,
        status_map = status_mapping(scope),
    ));

    parts.join("\n")
}

/// Prompt for the single refinement attempt after an empty result.
pub fn refinement(user_query: &str, failed_sql: &str, schema_context: &str) -> String {
    format!(
        r#"The following SQL query ran successfully but returned no rows:
{failed_sql}

Original user query: "{user_query}"

{schema_context}

Analyze what might be wrong and provide a refined SQL query that's more likely to succeed.
Common issues:
- Incorrect status values or field names
- Too restrictive date ranges
- Wrong table relationships
- Missing data in time periods

Respond with JSON only: {{"sql": "refined query", "description": "what was fixed"}}"#
    )
}

/// System prompt for the refinement call.
pub fn refinement_system() -> String {
    "You are a SQL query generator. Always respond with valid JSON only.".to_string()
}

/// System prompt for the business summary call.
pub fn summary_system() -> String {
    "You generate concise, business-friendly summaries for team analytics data. \
     Always respond with valid JSON only."
        .to_string()
}

/// User prompt for the business summary call.
pub fn summary_user(
    user_query: &str,
    description: &str,
    result: &QueryResult,
    insights: &str,
    scope: AppScope,
) -> String {
    format!(
        r#"You are analyzing {display} team performance data for: "{user_query}"

Query: {description}
Results: {count} records found

Key Data Insights: {insights}

Sample data (first 2 records):
{sample}

Create a business-friendly summary that:
1. Explains what the data shows in simple terms (avoid technical jargon)
2. Highlights 2-3 key findings that matter to team management
3. Suggests 1-2 actionable improvements based on the data
4. Keeps it concise (maximum 3 sentences)
5. Uses plain English - write as if explaining to a non-technical manager

Respond with JSON only: {{"summary": "your business summary"}}"#,
        display = scope.display_name(),
        count = result.row_count(),
        sample = sample_rows(result, 2),
    )
}

/// System prompt for the conversational (no-SQL) branch.
pub fn conversational_system(
    scope: AppScope,
    conversation_context: &str,
    transcripts: &[TranscriptChunk],
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !conversation_context.is_empty() {
        parts.push(conversation_context.to_string());
        parts.push(String::new());
    }
    if !transcripts.is_empty() {
        parts.push("=== RELEVANT MEETING TRANSCRIPTS ===".to_string());
        for chunk in transcripts.iter().take(5) {
            let date = chunk
                .meeting_date
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            parts.push(format!("-{date}: {}", head(&chunk.text, 400)));
        }
        parts.push(String::new());
    }
    parts.push(format!(
        "You are an AI assistant for a GitHub/Jira analytics dashboard ({} team).\n\
         Provide helpful advice based on software development best practices.\n\
         Keep responses concise and actionable (3-4 sentences).\n\
         Write in natural paragraph form. NEVER use lists or bullets.",
        scope.as_str()
    ));
    parts.join("\n")
}

/// Prompt for the one-time full developer analysis.
pub fn developer_analysis(
    developer: &str,
    result: &QueryResult,
    transcripts: &[TranscriptChunk],
) -> String {
    let metrics = serde_json::to_string(&result.rows).unwrap_or_else(|_| "[]".to_string());
    let transcripts_text = if transcripts.is_empty() {
        format!("No meeting transcripts available for {developer}")
    } else {
        transcripts
            .iter()
            .take(5)
            .enumerate()
            .map(|(i, chunk)| {
                let date = chunk
                    .meeting_date
                    .map(|d| format!(" on {d}"))
                    .unwrap_or_default();
                format!("Transcript {}{}:\n{}", i + 1, date, head(&chunk.text, 600))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"You are analyzing {developer}'s individual performance as a software developer.

Performance Metrics:
{metrics}

Meeting Context:
{transcripts_text}

Generate a comprehensive analysis with THREE distinct sections. Output ONLY valid JSON in this exact format:
{{
  "performance_summary": "2-3 sentences summarizing {developer}'s recent performance and activity level",
  "strengths": "4-5 sentences describing {developer}'s key strengths, what they excel at, and positive behaviors",
  "improvements": "4-5 sentences detailing specific areas where {developer} can improve with concrete, actionable steps"
}}

CRITICAL RULES:
1. Write in natural paragraph form (NO bullet points, NO numbered lists)
2. Focus ONLY on {developer} as an individual
3. Be specific and actionable
4. Use {developer}'s name naturally in the text
5. Return ONLY the JSON object, nothing else"#
    )
}

/// System prompt for the developer-analysis call.
pub fn analysis_system() -> String {
    "You are a performance analyst. Generate valid JSON only. Write in natural \
     paragraph form without bullet points or numbered lists."
        .to_string()
}

/// Deterministic fallbacks when the analysis call fails to produce JSON.
pub fn generic_analysis(developer: &str, first_row: Option<&Row>) -> DeveloperAnalysis {
    let get = |key: &str| -> i64 {
        first_row
            .and_then(|row| row.get(key))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    };
    let commits = get("total_commits");
    let prs = get("total_prs");
    let tickets = get("total_tickets");
    let activity = if commits > 10 { "strong" } else { "moderate" };

    DeveloperAnalysis {
        summary: format!(
            "Based on recent metrics, {developer} has contributed {commits} commits, {prs} pull \
             requests, and completed {tickets} tickets. This shows {activity} development \
             activity and engagement with the project."
        ),
        strengths: format!(
            "{developer} demonstrates consistent contributions to the codebase and shows \
             reliability in completing assigned tasks. They participate actively in the \
             development process and contribute to team deliverables. {developer}'s work shows \
             attention to meeting project requirements and maintaining development momentum."
        ),
        improvements: format!(
            "{developer} could enhance their impact by increasing participation in code reviews, \
             providing thoughtful feedback to teammates, and sharing knowledge more actively. \
             Dedicating time to learn new technologies or deepen expertise in the current tech \
             stack would boost productivity and code quality. Improving documentation practices \
             and writing clearer commit messages would also make their contributions easier for \
             others to build on."
        ),
        generated_at: chrono::Utc::now(),
    }
}

/// First rows rendered as "key: value" lines for prompts.
pub fn sample_rows(result: &QueryResult, limit: usize) -> String {
    result
        .rows
        .iter()
        .take(limit)
        .map(|row| {
            result
                .columns
                .iter()
                .filter_map(|col| row.get(col).map(|v| format!("{col}: {}", plain(v))))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn head(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
