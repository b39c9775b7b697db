// src/models/chat.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// One stored exchange between a user and the assistant.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct ChatHistory {
    pub id: i64,
    pub user_id: i64,
    pub user_message: String,
    pub ai_response: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A chat row joined with its owner's username, for log and admin display.
#[derive(Debug, FromRow)]
pub struct ChatHistoryWithUser {
    pub id: i64,
    pub username: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl fmt::Display for ChatHistoryWithUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chat by {} at {}", self.username, self.created_at)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatHistoryEntry {
    pub id: i64,
    pub user_message: String,
    pub ai_response: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ChatHistory> for ChatHistoryEntry {
    fn from(row: ChatHistory) -> Self {
        ChatHistoryEntry {
            id: row.id,
            user_message: row.user_message,
            ai_response: row.ai_response,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub user_message: String,
    pub ai_response: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_names_the_owner_and_time() {
        let row = ChatHistoryWithUser {
            id: 7,
            username: "alice".to_string(),
            created_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        };
        assert_eq!(row.to_string(), "Chat by alice at 2024-05-01 12:30:00 UTC");
    }

    #[test]
    fn chat_request_accepts_missing_and_null_message() {
        let missing: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(missing.message.is_none());

        let null: ChatRequest = serde_json::from_str(r#"{"message": null}"#).unwrap();
        assert!(null.message.is_none());
    }
}
