//! DevPulse Web Server
//!
//! Hosts the AI query pipeline behind a small REST surface: the ai-query
//! endpoint, conversation session management, the dashboard read model and
//! a health check.

mod routes;
mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devpulse::ai::AnthropicClient;
use devpulse::ai::LlmClient;
use devpulse::query::{PgQueryExecutor, SchemaContextProvider};
use devpulse::QueryPipeline;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devpulse_web=debug,devpulse=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DevPulse Web Server");

    // Database connection
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgresql:///devpulse".to_string());

    let pool = match sqlx::PgPool::connect(&database_url).await {
        Ok(p) => {
            tracing::info!("Database connection established");
            p
        }
        Err(e) => {
            tracing::error!("Failed to connect to database at {}: {}", database_url, e);
            tracing::error!(
                "Please check DATABASE_URL environment variable and ensure PostgreSQL is running"
            );
            return Err(format!("Database connection failed: {}", e).into());
        }
    };

    // Prompt-history table (the only relation this service owns)
    if let Err(e) = sqlx::migrate!().run(&pool).await {
        tracing::warn!("Migration failed (prompt audit log may be unavailable): {e}");
    }

    // LLM client
    let llm = match AnthropicClient::from_env() {
        Ok(client) => {
            tracing::info!("LLM client ready (model: {})", client.model_name());
            Arc::new(client)
        }
        Err(e) => {
            tracing::error!("Failed to initialize LLM client: {e}");
            return Err(format!("LLM client initialization failed: {}", e).into());
        }
    };

    // Assemble the pipeline
    let pipeline = Arc::new(QueryPipeline::new(
        llm,
        Arc::new(PgQueryExecutor::new(pool.clone())),
        Arc::new(SchemaContextProvider::new(pool.clone())),
    ));

    let app_state = AppState::new(pool, pipeline);

    // CORS for the dashboard front-end
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/ai-query", post(routes::api::ai_query))
        .route(
            "/api/conversation/reset",
            post(routes::api::reset_conversation),
        )
        .route(
            "/api/conversation/status",
            get(routes::api::conversation_status),
        )
        .route("/api/dashboard", get(routes::api::dashboard))
        .route("/api/health", get(routes::api::health_check))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("DevPulse Web Server running on http://{}", addr);
    tracing::info!("API Endpoints:");
    tracing::info!("  POST /api/ai-query            - natural-language query");
    tracing::info!("  POST /api/conversation/reset  - clear conversation state");
    tracing::info!("  GET  /api/conversation/status - conversation status");
    tracing::info!("  GET  /api/dashboard           - entity counts");
    tracing::info!("  GET  /api/health              - health check");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(format!("Failed to bind to {}: {}", addr, e).into());
        }
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Server error: {}", e);
        return Err(format!("Server error: {}", e).into());
    }

    Ok(())
}
