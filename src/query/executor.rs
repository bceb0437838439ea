//! Sandboxed query execution
//!
//! The executor is the only place LLM-generated SQL touches the database.
//! It re-validates the statement (the orchestrator already has, but the
//! gate is layered), applies the server-side statement timeout on the
//! acquired connection, and decodes whatever comes back into JSON rows in
//! database column order. The model picks its own column names and types,
//! so decoding has to be dynamic.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, PgPool, Row as SqlxRow, TypeInfo};

use crate::config::STATEMENT_TIMEOUT_MS;
use crate::error::PipelineError;
use crate::query::{sandbox, QueryResult, Row};

/// Execution seam for generated SQL. Mocked/spied in pipeline tests.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, PipelineError>;
}

/// Postgres executor with a statement timeout.
#[derive(Clone)]
pub struct PgQueryExecutor {
    pool: PgPool,
    statement_timeout_ms: u32,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout_ms: STATEMENT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(pool: PgPool, statement_timeout_ms: u32) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, PipelineError> {
        sandbox::validate(sql)?;

        let mut conn = self.pool.acquire().await?;
        // Scoped to this connection; protects against runaway generated SQL.
        sqlx::query(&format!(
            "SET statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *conn)
        .await?;

        let pg_rows = sqlx::query(sql).fetch_all(&mut *conn).await?;

        let columns: Vec<String> = pg_rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = pg_rows.iter().map(decode_row).collect();
        Ok(QueryResult { columns, rows })
    }
}

fn decode_row(row: &PgRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        out.insert(column.name().to_string(), decode_value(row, column));
    }
    out
}

/// Decode one cell into a JSON value by Postgres type name. Unknown types
/// fall back to their textual form rather than failing the whole row.
fn decode_value(row: &PgRow, column: &PgColumn) -> Value {
    let idx = column.ordinal();
    match column.type_info().name() {
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx).map(|v| v.map(Value::from))),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx).map(|v| v.map(Value::from))),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from))),
        "FLOAT4" => opt(row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(|f| Value::from(f as f64)))),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::from))),
        "NUMERIC" => opt(row.try_get::<Option<Decimal>, _>(idx).map(|v| {
            v.map(|d| match d.to_i64() {
                // keep whole numbers (SUM/COUNT over ints) as integers
                Some(i) if Decimal::from(i) == d => Value::from(i),
                _ => Value::from(d.to_f64().unwrap_or(0.0)),
            })
        })),
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::from))),
        "TIMESTAMPTZ" => opt(row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| v.map(|t| Value::from(t.to_rfc3339())))),
        "TIMESTAMP" => opt(row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| Value::from(t.format("%Y-%m-%dT%H:%M:%S").to_string())))),
        "DATE" => opt(row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::from(d.format("%Y-%m-%d").to_string())))),
        "JSON" | "JSONB" => opt(row.try_get::<Option<Value>, _>(idx)),
        _ => opt(row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::from))),
    }
}

fn opt(decoded: Result<Option<Value>, sqlx::Error>) -> Value {
    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::debug!("undecodable column value: {e}");
            Value::Null
        }
    }
}
