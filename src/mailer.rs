// src/mailer.rs
//! Outgoing email through a transactional-mail HTTP API.

use crate::config::EmailConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Email API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

pub fn welcome_email(from: &str, user_email: &str, username: &str) -> EmailMessage {
    EmailMessage {
        from: from.to_string(),
        to: vec![user_email.to_string()],
        subject: "Welcome to the AI Chatbot!".to_string(),
        text: format!(
            "Hi {},\n\nThank you for registering. Your account has been successfully created.\n\nBest,\nThe AI Team",
            username
        ),
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpMailer {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(30))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Used when no email API is configured: records the message instead of
/// sending it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = ?message.to,
            subject = %message.subject,
            "Email delivery not configured, skipping send"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log_only"
    }
}
