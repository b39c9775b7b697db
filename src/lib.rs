// lib.rs - shared state and router for the chatbot API
pub mod config;
pub mod db;
pub mod error;
pub mod gemini_client;
pub mod handlers;
pub mod jobs;
pub mod knowledge_base;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod qdrant_client;
pub mod rag;
pub mod vector_index;

use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub const AUTH_RATE_LIMIT_REQUESTS: u32 = 10;
pub const AUTH_RATE_LIMIT_WINDOW_SECS: u64 = 60;

// AppState holds the database pool, token keys, the RAG pipeline (when Gemini is configured), and the mailer
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub jwt: handlers::auth::JwtKeys,
    pub rag: Option<rag::RagPipeline>,
    pub mailer: Arc<dyn mailer::Mailer>,
    pub email_from: String,
    pub auth_rate_limiter: middleware::rate_limit::RateLimiter,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::chat::chat_routes())
        .route("/api/status", get(handlers::status::api_status))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}
