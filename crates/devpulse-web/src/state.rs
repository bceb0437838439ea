//! Shared server state

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use devpulse::audit::PromptHistoryRepository;
use devpulse::chat::Snapshot;
use devpulse::QueryPipeline;

/// Session-id to bounded conversation snapshot. Per-session writes are
/// serialized behind the lock; racing requests from one session resolve
/// last-writer-wins.
pub type SessionStore = Arc<RwLock<HashMap<Uuid, Snapshot>>>;

pub fn create_session_store() -> SessionStore {
    Arc::new(RwLock::new(HashMap::new()))
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub pipeline: Arc<QueryPipeline>,
    pub sessions: SessionStore,
    pub audit: PromptHistoryRepository,
}

impl AppState {
    pub fn new(pool: PgPool, pipeline: Arc<QueryPipeline>) -> Self {
        Self {
            audit: PromptHistoryRepository::new(pool.clone()),
            pool,
            pipeline,
            sessions: create_session_store(),
        }
    }
}
