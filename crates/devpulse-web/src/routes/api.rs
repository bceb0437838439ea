//! REST API endpoints
//!
//! - POST /api/ai-query            - natural-language query pipeline
//! - POST /api/conversation/reset  - clear a session's conversation state
//! - GET  /api/conversation/status - whether a session has context
//! - GET  /api/dashboard           - entity counts for one tenant
//! - GET  /api/health              - liveness + database check

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use devpulse::chat::ConversationState;
use devpulse::format::FormattedPayload;
use devpulse::pipeline::QueryRequest;
use devpulse::scope::AppScope;

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AiQueryRequest {
    pub query: String,
    #[serde(default)]
    pub app_type: AppScope,
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AiQueryResponse {
    #[serde(flatten)]
    pub payload: FormattedPayload,
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionRef {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub has_context: bool,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    pub app_type: AppScope,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub app_type: AppScope,
    pub developers_count: i64,
    pub repositories_count: i64,
    pub commits_count: i64,
    pub pull_requests_count: i64,
    pub tickets_count: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/ai-query - run the query pipeline for one question
pub async fn ai_query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<AiQueryRequest>,
) -> Result<Json<AiQueryResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Query must not be blank.",
        ));
    }

    let session_id = req.session_id.unwrap_or_else(Uuid::new_v4);
    let scope = req.app_type;

    // Audit first; a failed write is logged, never fatal.
    state
        .audit
        .record(&requester_ip(&headers, addr), req.query.trim(), scope)
        .await;

    // Rehydrate the session's bounded snapshot.
    let mut conversation = {
        let sessions = state.sessions.read().await;
        sessions
            .get(&session_id)
            .cloned()
            .map(ConversationState::from_snapshot)
            .unwrap_or_default()
    };

    let request = QueryRequest {
        query: req.query.trim().to_string(),
        scope,
    };

    match state.pipeline.process(&request, &mut conversation).await {
        Ok(payload) => {
            let mut sessions = state.sessions.write().await;
            sessions.insert(session_id, conversation.to_snapshot());
            Ok(Json(AiQueryResponse {
                payload,
                session_id,
            }))
        }
        Err(e) => {
            tracing::error!("ai query failed: {e:?}");
            // The session survives a failed turn; persist whatever state
            // existed before it.
            let mut sessions = state.sessions.write().await;
            sessions.insert(session_id, conversation.to_snapshot());

            let status = if e.is_user_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Err(error_response(status, e.user_message()))
        }
    }
}

/// POST /api/conversation/reset - drop a session's context
pub async fn reset_conversation(
    State(state): State<AppState>,
    Json(req): Json<SessionRef>,
) -> Json<serde_json::Value> {
    let removed = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&req.session_id).is_some()
    };
    tracing::info!("conversation reset for {} (existed: {removed})", req.session_id);
    Json(serde_json::json!({ "success": true }))
}

/// GET /api/conversation/status?session_id=... - does context exist?
pub async fn conversation_status(
    State(state): State<AppState>,
    Query(req): Query<SessionRef>,
) -> Json<StatusResponse> {
    let has_context = {
        let sessions = state.sessions.read().await;
        sessions
            .get(&req.session_id)
            .map(|snapshot| !snapshot.history.is_empty() || !snapshot.focus.is_empty())
            .unwrap_or(false)
    };
    Json(StatusResponse { has_context })
}

/// GET /api/dashboard - entity counts for one tenant
pub async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let scope = params.app_type;
    let count = |table: &str| {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE app_type = $1");
        let pool = state.pool.clone();
        async move {
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(scope.as_str())
                .fetch_one(&pool)
                .await
        }
    };

    let counts = tokio::try_join!(
        count("developers"),
        count("repositories"),
        count("commits"),
        count("pull_requests"),
        count("tickets"),
    );

    match counts {
        Ok((developers, repositories, commits, pull_requests, tickets)) => {
            Ok(Json(DashboardResponse {
                app_type: scope,
                developers_count: developers,
                repositories_count: repositories,
                commits_count: commits,
                pull_requests_count: pull_requests,
                tickets_count: tickets,
            }))
        }
        Err(e) => {
            tracing::error!("dashboard counts failed: {e}");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not load dashboard data.",
            ))
        }
    }
}

/// GET /api/health - liveness and database connectivity
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        database: database.to_string(),
    })
}

/// Prefer the proxy-forwarded address, fall back to the socket peer.
fn requester_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}
