// src/error.rs
use crate::models::auth::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Errors returned from HTTP handlers. Internal causes are logged and never
/// reach the client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("AI service is not configured")]
    AiNotConfigured,
    #[error("AI service unavailable")]
    AiUnavailable(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::AiNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::AiUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) | ApiError::Internal(_) => "Internal server error".to_string(),
            ApiError::AiUnavailable(_) => "AI service unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Database(e) => tracing::error!("Database error: {}", e),
            ApiError::Internal(e) => tracing::error!("Internal error: {}", e),
            ApiError::AiUnavailable(e) => tracing::error!("AI request failed: {}", e),
            _ => {}
        }

        (
            self.status_code(),
            Json(ErrorResponse {
                success: false,
                message: self.public_message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_details_are_hidden() {
        let err = ApiError::Internal("bcrypt exploded".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");

        let err = ApiError::AiUnavailable("Gemini API error (500): boom".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.public_message(), "AI service unavailable");
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = ApiError::BadRequest("Message is required".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Message is required");
    }
}
