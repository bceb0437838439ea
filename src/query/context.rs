//! Live schema context
//!
//! The SQL prompt works much better when the model can see what is
//! actually in the store: row counts, most-recent activity, and the
//! distinct ticket statuses the board really uses. Context is best-effort:
//! any failure here is logged and collapses to an empty string, never a
//! request failure.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;

use crate::scope::AppScope;

/// Seam the orchestrator calls through; mocked in pipeline tests.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Build the data-context block for prompts. Empty string on failure.
    async fn build(&self, scope: AppScope) -> String;
}

/// Postgres-backed context provider.
#[derive(Clone)]
pub struct SchemaContextProvider {
    pool: PgPool,
}

/// Count + latest-activity pair for one table.
struct TableActivity {
    total: i64,
    latest: Option<NaiveDateTime>,
}

impl SchemaContextProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn table_activity(
        &self,
        scope: AppScope,
        table: &str,
        timestamp_column: &str,
    ) -> Result<TableActivity, sqlx::Error> {
        let sql = format!(
            "SELECT COUNT(*), MAX({timestamp_column}) FROM {table} WHERE app_type = $1"
        );
        let (total, latest): (i64, Option<NaiveDateTime>) = sqlx::query_as(&sql)
            .bind(scope.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(TableActivity { total, latest })
    }

    async fn developer_count(&self, scope: AppScope) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT id) FROM developers WHERE app_type = $1")
                .bind(scope.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn ticket_statuses(&self, scope: AppScope) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT status FROM tickets WHERE app_type = $1 ORDER BY status")
                .bind(scope.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(status,)| status).collect())
    }

    async fn try_build(&self, scope: AppScope) -> Result<String, sqlx::Error> {
        let commits = self.table_activity(scope, "commits", "committed_at").await?;
        let prs = self
            .table_activity(scope, "pull_requests", "opened_at")
            .await?;
        let tickets = self
            .table_activity(scope, "tickets", "created_at_jira")
            .await?;
        let developers = self.developer_count(scope).await?;
        let statuses = self.ticket_statuses(scope).await?;

        let lines = vec![
            "=== CURRENT DATA CONTEXT ===".to_string(),
            format!("App: {}", scope.display_name()),
            format!("Active Developers: {developers}"),
            format!(
                "Total Commits: {} (latest: {})",
                commits.total,
                latest_label(commits.latest)
            ),
            format!(
                "Total Pull Requests: {} (latest: {})",
                prs.total,
                latest_label(prs.latest)
            ),
            format!(
                "Total Tickets: {} (latest: {})",
                tickets.total,
                latest_label(tickets.latest)
            ),
            format!("Available Ticket Statuses: {}", statuses.join(", ")),
            "=== END CONTEXT ===".to_string(),
        ];
        Ok(lines.join("\n"))
    }
}

fn latest_label(latest: Option<NaiveDateTime>) -> String {
    latest
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[async_trait]
impl ContextProvider for SchemaContextProvider {
    async fn build(&self, scope: AppScope) -> String {
        match self.try_build(scope).await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!("error building database context: {e}");
                String::new()
            }
        }
    }
}
