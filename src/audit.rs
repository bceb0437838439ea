//! Prompt audit log
//!
//! Every incoming query is appended to `prompt_histories`, keyed uniquely
//! on requester address + exact prompt text so repeats deduplicate. The
//! log is write-only from the pipeline's perspective (reviewed out of
//! band) and a failed write never fails the request.

use sqlx::PgPool;

use crate::scope::AppScope;

#[derive(Clone)]
pub struct PromptHistoryRepository {
    pool: PgPool,
}

impl PromptHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent append; conflicts on (ip_address, prompt) are ignored.
    pub async fn record(&self, ip_address: &str, prompt: &str, scope: AppScope) {
        let result = sqlx::query(
            "INSERT INTO prompt_histories (ip_address, prompt, app_type, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (ip_address, prompt) DO NOTHING",
        )
        .bind(ip_address)
        .bind(prompt)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("failed to record prompt history: {e}");
        }
    }
}
