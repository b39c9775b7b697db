use crate::AppState;
use axum::{extract::Extension, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

// API Status endpoint
pub async fn api_status(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let (ai_status, vector_index, knowledge_base) = match &state.rag {
        Some(rag) => {
            let kb = rag.knowledge_base();
            (
                "configured",
                kb.index().name(),
                json!({
                    "path": kb.path().display().to_string(),
                    "loaded_chunks": kb.chunk_count().await,
                }),
            )
        }
        None => ("not_configured", "none", Value::Null),
    };

    Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "gemini": ai_status,
            "vector_index": vector_index,
            "email": state.mailer.name(),
            "knowledge_base": knowledge_base,
        },
        "endpoints": {
            "status": "/api/status",
            "auth": ["/api/signup/", "/api/login/", "/api/token/refresh/", "/api/token/verify/"],
            "chat": ["/api/chat/", "/api/chat/history/"],
        }
    }))
}
