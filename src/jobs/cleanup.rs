// src/jobs/cleanup.rs
use crate::models::chat::ChatHistoryWithUser;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const LOGGED_ROWS_LIMIT: i64 = 20;

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("Retention of {0} days is out of range")]
    Retention(i64),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Rows created at or before this instant are expired. `None` when the
/// retention window does not fit in a timestamp.
pub fn cleanup_cutoff(now: DateTime<Utc>, retention_days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(retention_days).and_then(|window| now.checked_sub_signed(window))
}

/// Deletes chat rows older than the retention window and returns how many
/// were removed.
pub async fn delete_old_chats(pool: &PgPool, retention_days: i64) -> Result<u64, CleanupError> {
    let cutoff = cleanup_cutoff(Utc::now(), retention_days)
        .ok_or(CleanupError::Retention(retention_days))?;

    if tracing::enabled!(tracing::Level::DEBUG) {
        let expiring = sqlx::query_as::<_, ChatHistoryWithUser>(
            "SELECT c.id, u.username, c.created_at
             FROM chat_history c JOIN users u ON u.id = c.user_id
             WHERE c.created_at <= $1
             ORDER BY c.created_at
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(LOGGED_ROWS_LIMIT)
        .fetch_all(pool)
        .await?;

        for chat in &expiring {
            tracing::debug!(chat_id = chat.id, "Deleting {}", chat);
        }
    }

    let count = sqlx::query("DELETE FROM chat_history WHERE created_at <= $1")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    tracing::info!("Deleted {} old chat records (cutoff {})", count, cutoff);
    Ok(count)
}

/// Runs [`delete_old_chats`] every `every`, starting one period from now.
/// Failures are logged and the loop keeps going.
pub fn start_cleanup_scheduler(
    pool: PgPool,
    every: std::time::Duration,
    retention_days: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Chat cleanup scheduler started (every {}h, retention {} days)",
            every.as_secs() / 3600,
            retention_days
        );

        loop {
            ticker.tick().await;
            if let Err(e) = delete_old_chats(&pool, retention_days).await {
                tracing::error!("Chat cleanup failed: {}", e);
            }
        }
    })
}
