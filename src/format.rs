//! Chart payload shaping
//!
//! The model chooses its own column names and aliases, so the formatter is
//! defensive rather than shape-assuming: value and label columns are
//! detected by priority lists with positional fallbacks, and anything that
//! cannot be charted degrades to a table. Output is deterministic for
//! identical input.

use serde::Serialize;
use serde_json::{json, Value};

use crate::ai::parser::{ChartType, GeneratedQuery};
use crate::query::{QueryResult, Row};

/// Columns that hold the measure when present, in priority order.
const VALUE_COLUMN_PRIORITY: &[&str] = &[
    "total",
    "total_activity",
    "count",
    "commits",
    "pull_requests",
    "tickets",
];

/// Columns that hold the label when present, in priority order.
const LABEL_COLUMN_PRIORITY: &[&str] = &[
    "name",
    "developer_name",
    "title",
    "repository_name",
    "status",
];

const BAR_PALETTE: &[(u8, u8, u8)] = &[
    (52, 152, 219),  // blue
    (46, 204, 113),  // green
    (241, 196, 15),  // yellow
    (231, 76, 60),   // red
    (155, 89, 182),  // purple
    (230, 126, 34),  // orange
];

const PIE_PALETTE: &[(u8, u8, u8)] = &[
    (52, 152, 219),
    (46, 204, 113),
    (241, 196, 15),
    (231, 76, 60),
    (155, 89, 182),
    (230, 126, 34),
    (26, 188, 156),  // turquoise
    (243, 156, 18),  // dark orange
];

/// Per-request processing metadata echoed to the client.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ProcessingInfo {
    pub model_used: String,
    pub context_used: bool,
    pub refinement_used: bool,
    pub query_type: String,
}

/// The external-facing response contract.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub user_query: String,
    pub description: String,
    pub chart_type: ChartType,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub raw_results: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Conversational (no-SQL) answer text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub processing_info: ProcessingInfo,
}

impl FormattedPayload {
    /// The "successful miss": a query that ran but matched nothing.
    pub fn no_results(user_query: &str) -> Self {
        Self {
            success: false,
            error: Some("No results found".to_string()),
            user_query: user_query.to_string(),
            description: String::new(),
            chart_type: ChartType::Table,
            data: Value::Null,
            raw_results: Vec::new(),
            summary: None,
            response: None,
            processing_info: ProcessingInfo::default(),
        }
    }

    /// A plain-text (conversational) answer.
    pub fn text_response(user_query: &str, description: &str, response: String) -> Self {
        Self {
            success: true,
            error: None,
            user_query: user_query.to_string(),
            description: description.to_string(),
            chart_type: ChartType::Text,
            data: Value::Null,
            raw_results: Vec::new(),
            summary: None,
            response: Some(response),
            processing_info: ProcessingInfo::default(),
        }
    }
}

/// Shape a result set according to the generated query's chart type.
pub fn format_results(
    result: &QueryResult,
    generated: &GeneratedQuery,
    user_query: &str,
) -> FormattedPayload {
    if result.is_empty() {
        return FormattedPayload::no_results(user_query);
    }

    let (chart_type, data) = match generated.chart_type {
        ChartType::Bar => format_bar(result),
        ChartType::Pie => format_pie(result),
        ChartType::Table | ChartType::Text => (ChartType::Table, format_table(result)),
    };

    FormattedPayload {
        success: true,
        error: None,
        user_query: user_query.to_string(),
        description: generated.description.clone(),
        chart_type,
        data,
        raw_results: result.rows.clone(),
        summary: None,
        response: None,
        processing_info: ProcessingInfo::default(),
    }
}

/// Bar chart: detected label/value columns, one dataset. Falls back to a
/// table when no usable value column exists.
fn format_bar(result: &QueryResult) -> (ChartType, Value) {
    let Some(value_column) = detect_value_column(result) else {
        return (ChartType::Table, format_table(result));
    };
    let label_column = detect_label_column(&result.columns);

    let labels: Vec<String> = result
        .rows
        .iter()
        .map(|row| format_label(row.get(&label_column)))
        .collect();
    let values: Vec<i64> = result
        .rows
        .iter()
        .map(|row| numeric_value(row.get(&value_column)))
        .collect();
    let count = values.len();

    let data = json!({
        "labels": labels,
        "datasets": [{
            "label": humanize(&value_column),
            "data": values,
            "backgroundColor": palette_colors(BAR_PALETTE, count, 0.6),
            "borderColor": palette_colors(BAR_PALETTE, count, 1.0),
            "borderWidth": 1
        }]
    });
    (ChartType::Bar, data)
}

/// Pie chart: first column labels, second column values; needs two columns.
fn format_pie(result: &QueryResult) -> (ChartType, Value) {
    if result.columns.len() < 2 {
        return (ChartType::Table, format_table(result));
    }
    let label_column = &result.columns[0];
    let value_column = &result.columns[1];

    let labels: Vec<String> = result
        .rows
        .iter()
        .map(|row| format_label(row.get(label_column)))
        .collect();
    let values: Vec<i64> = result
        .rows
        .iter()
        .map(|row| numeric_value(row.get(value_column)))
        .collect();
    let count = values.len();

    let data = json!({
        "labels": labels,
        "datasets": [{
            "data": values,
            "backgroundColor": palette_colors(PIE_PALETTE, count, 0.7),
            "borderColor": palette_colors(PIE_PALETTE, count, 1.0),
            "borderWidth": 1
        }]
    });
    (ChartType::Pie, data)
}

/// Table: humanized headers, values formatted for display, column order
/// preserved from the database.
fn format_table(result: &QueryResult) -> Value {
    let headers: Vec<String> = result.columns.iter().map(|c| humanize(c)).collect();
    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .map(|col| format_table_value(row.get(col)))
                .collect()
        })
        .collect();

    json!({
        "headers": headers,
        "rows": rows,
        "raw_headers": result.columns,
    })
}

/// Value column: priority names first, then the second column if numeric,
/// then any numeric column.
fn detect_value_column(result: &QueryResult) -> Option<String> {
    for candidate in VALUE_COLUMN_PRIORITY {
        if result.columns.iter().any(|c| c == candidate) {
            return Some(candidate.to_string());
        }
    }

    let first_row = result.rows.first()?;
    let numeric: Vec<&String> = result
        .columns
        .iter()
        .filter(|col| first_row.get(*col).map(Value::is_number).unwrap_or(false))
        .collect();

    if result.columns.len() >= 2 && numeric.iter().any(|c| **c == result.columns[1]) {
        return Some(result.columns[1].clone());
    }
    numeric.first().map(|c| (*c).clone())
}

/// Label column: priority names first, else the first column.
fn detect_label_column(columns: &[String]) -> String {
    for candidate in LABEL_COLUMN_PRIORITY {
        if let Some(found) = columns.iter().find(|c| *c == candidate) {
            return found.clone();
        }
    }
    columns
        .first()
        .cloned()
        .unwrap_or_else(|| "label".to_string())
}

/// Cycle a palette to `count` rgba strings at the given alpha.
fn palette_colors(palette: &[(u8, u8, u8)], count: usize, alpha: f32) -> Vec<String> {
    (0..count)
        .map(|i| {
            let (r, g, b) = palette[i % palette.len()];
            if (alpha - 1.0).abs() < f32::EPSILON {
                format!("rgba({r}, {g}, {b}, 1)")
            } else {
                format!("rgba({r}, {g}, {b}, {alpha})")
            }
        })
        .collect()
}

/// Chart labels: dashes/underscores to spaces, title case.
fn format_label(value: Option<&Value>) -> String {
    let text = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    if text.contains('-') || text.contains('_') {
        title_case(&text.replace(['-', '_'], " "))
    } else {
        text
    }
}

/// Table cells: dates shortened, floats rounded, null a placeholder dash.
fn format_table_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => match parse_timestamp(s) {
            Some(date) => date.format("%b %d, %Y").to_string(),
            None => s.clone(),
        },
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                format!("{:.2}", n.as_f64().unwrap_or(0.0))
            }
        }
        Some(other) => other.to_string(),
    }
}

/// Recognize the timestamp formats the executor emits.
fn parse_timestamp(text: &str) -> Option<chrono::NaiveDate> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn humanize(column: &str) -> String {
    title_case(&column.replace(['_', '-'], " "))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best-effort integer coercion, matching how chart values are consumed.
fn numeric_value(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .unwrap_or_else(|| n.as_f64().unwrap_or(0.0).round() as i64),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
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

    fn generated(chart_type: ChartType) -> GeneratedQuery {
        GeneratedQuery {
            sql: "SELECT 1".into(),
            description: "Test".into(),
            chart_type,
            ..Default::default()
        }
    }

    #[test]
    fn bar_chart_orders_labels_and_values() {
        let r = result(
            &["name", "total"],
            vec![
                vec![json!("Alice"), json!(40)],
                vec![json!("Bob"), json!(30)],
                vec![json!("Carol"), json!(20)],
                vec![json!("Dan"), json!(10)],
                vec![json!("Eve"), json!(5)],
            ],
        );
        let payload = format_results(&r, &generated(ChartType::Bar), "top 5 developers by commits");
        assert!(payload.success);
        assert_eq!(payload.chart_type, ChartType::Bar);
        assert_eq!(payload.data["labels"].as_array().unwrap().len(), 5);
        assert_eq!(
            payload.data["datasets"][0]["data"],
            json!([40, 30, 20, 10, 5])
        );
        assert_eq!(payload.data["datasets"][0]["label"], "Total");
    }

    #[test]
    fn bar_prefers_priority_value_column_over_position() {
        let r = result(
            &["name", "rank", "commits"],
            vec![vec![json!("Alice"), json!(1), json!(40)]],
        );
        let payload = format_results(&r, &generated(ChartType::Bar), "q");
        assert_eq!(payload.data["datasets"][0]["data"], json!([40]));
    }

    #[test]
    fn single_column_bar_falls_back_to_table() {
        let r = result(&["name"], vec![vec![json!("Alice")]]);
        let payload = format_results(&r, &generated(ChartType::Bar), "q");
        assert_eq!(payload.chart_type, ChartType::Table);
        assert_eq!(payload.data["headers"], json!(["Name"]));
    }

    #[test]
    fn pie_needs_two_columns_and_cycles_palette() {
        let rows: Vec<Vec<Value>> = (0..10)
            .map(|i| vec![json!(format!("s{i}")), json!(i)])
            .collect();
        let r = result(&["status", "count"], rows);
        let payload = format_results(&r, &generated(ChartType::Pie), "q");
        assert_eq!(payload.chart_type, ChartType::Pie);
        let colors = payload.data["datasets"][0]["backgroundColor"]
            .as_array()
            .unwrap();
        assert_eq!(colors.len(), 10);
        // palette has 8 entries; the ninth color repeats the first
        assert_eq!(colors[8], colors[0]);
    }

    #[test]
    fn table_formats_dates_and_nulls() {
        let r = result(
            &["name", "committed_at", "score"],
            vec![vec![
                json!("Alice"),
                json!("2026-08-01T12:30:00+00:00"),
                json!(null),
            ]],
        );
        let payload = format_results(&r, &generated(ChartType::Table), "q");
        assert_eq!(
            payload.data["rows"],
            json!([["Alice", "Aug 01, 2026", "-"]])
        );
        assert_eq!(payload.data["headers"], json!(["Name", "Committed At", "Score"]));
    }

    #[test]
    fn empty_results_become_error_payload() {
        let r = result(&[], vec![]);
        let payload = format_results(&r, &generated(ChartType::Bar), "q");
        assert!(!payload.success);
        assert_eq!(payload.error.as_deref(), Some("No results found"));
    }

    #[test]
    fn format_is_deterministic() {
        let r = result(
            &["name", "total"],
            vec![
                vec![json!("Alice"), json!(40)],
                vec![json!("Bob"), json!(30)],
            ],
        );
        let a = format_results(&r, &generated(ChartType::Bar), "q");
        let b = format_results(&r, &generated(ChartType::Bar), "q");
        assert_eq!(
            serde_json::to_string(&a.data).unwrap(),
            serde_json::to_string(&b.data).unwrap()
        );
    }

    #[test]
    fn labels_with_separators_are_title_cased() {
        let r = result(
            &["repository_name", "count"],
            vec![vec![json!("core-api"), json!(3)]],
        );
        let payload = format_results(&r, &generated(ChartType::Bar), "q");
        assert_eq!(payload.data["labels"], json!(["Core Api"]));
    }
}
