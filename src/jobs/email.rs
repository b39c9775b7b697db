// src/jobs/email.rs
use crate::mailer::{welcome_email, EmailMessage, Mailer};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Sends one message and reports whether it went out. Failures are logged,
/// never propagated.
pub async fn send_welcome_email_task(mailer: &dyn Mailer, message: EmailMessage) -> bool {
    match mailer.send(&message).await {
        Ok(()) => {
            tracing::info!("Email task: sent welcome email to {:?} via {}", message.to, mailer.name());
            true
        }
        Err(e) => {
            tracing::error!("Email task failed for {:?}: {}", message.to, e);
            false
        }
    }
}

/// Sends the welcome email on its own task so signup does not wait for it.
pub fn run_email_background(
    mailer: Arc<dyn Mailer>,
    from: &str,
    user_email: &str,
    username: &str,
) -> JoinHandle<bool> {
    let message = welcome_email(from, user_email, username);
    tokio::spawn(async move { send_welcome_email_task(mailer.as_ref(), message).await })
}
