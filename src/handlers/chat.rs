use crate::error::ApiError;
use crate::handlers::auth::load_active_user;
use crate::knowledge_base::KnowledgeBaseError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::chat::*;
use crate::rag::RagError;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::Json,
    routing::{get, post, Router},
};
use std::sync::Arc;

const MAX_HISTORY_LIMIT: i64 = 500;

pub fn chat_routes() -> Router {
    Router::new()
        .route("/api/chat/", post(chat))
        .route("/api/chat/history/", get(chat_history))
        .layer(axum::middleware::from_fn(auth_middleware))
}

fn required_message(payload: ChatRequest) -> Result<String, ApiError> {
    match payload.message {
        Some(message) if !message.trim().is_empty() => Ok(message),
        _ => Err(ApiError::BadRequest("Message is required".to_string())),
    }
}

fn rag_error(e: RagError) -> ApiError {
    match e {
        RagError::KnowledgeBase(KnowledgeBaseError::Io(e)) => {
            ApiError::Internal(format!("Knowledge base unreadable: {}", e))
        }
        other => ApiError::AiUnavailable(other.to_string()),
    }
}

async fn chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let user_message = required_message(payload)?;
    let rag = state.rag.as_ref().ok_or(ApiError::AiNotConfigured)?;
    let user = load_active_user(&state, &claims).await?;

    tracing::info!(user_id = user.id, "Answering chat message");

    // Nothing is stored when generation fails
    let ai_response = rag.answer(&user_message).await.map_err(rag_error)?;

    let record = sqlx::query_as::<_, ChatHistory>(
        "INSERT INTO chat_history (user_id, user_message, ai_response, created_at)
         VALUES ($1, $2, $3, NOW())
         RETURNING id, user_id, user_message, ai_response, created_at",
    )
    .bind(user.id)
    .bind(&user_message)
    .bind(&ai_response)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::debug!(chat_id = record.id, "Stored chat exchange");

    Ok(Json(ChatResponse {
        user_message: record.user_message,
        ai_response: record.ai_response,
    }))
}

fn page_bounds(query: &HistoryQuery) -> Result<(i64, i64), ApiError> {
    let limit = query.limit.unwrap_or(MAX_HISTORY_LIMIT);
    let offset = query.offset.unwrap_or(0);

    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }
    if offset < 0 {
        return Err(ApiError::BadRequest("offset must not be negative".to_string()));
    }
    Ok((limit, offset))
}

async fn chat_history(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatHistoryEntry>>, ApiError> {
    let (limit, offset) = page_bounds(&query)?;
    let user = load_active_user(&state, &claims).await?;

    let rows = sqlx::query_as::<_, ChatHistory>(
        "SELECT id, user_id, user_message, ai_response, created_at
         FROM chat_history
         WHERE user_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(user.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(rows.into_iter().map(ChatHistoryEntry::from).collect()))
}
