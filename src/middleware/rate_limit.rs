use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// Fixed-window request counter keyed by client IP.
#[derive(Clone)]
pub struct RateLimiter {
    // Store IP -> (request_count, window_start)
    clients: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
    max_requests: u32,
    window_duration: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window_duration: Duration::from_secs(window_seconds),
        }
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_duration.as_secs()
    }

    pub fn check_rate_limit(&self, client_ip: &str) -> bool {
        self.check_at(client_ip, Instant::now())
    }

    fn check_at(&self, client_ip: &str, now: Instant) -> bool {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match clients.get_mut(client_ip) {
            Some((count, window_start)) => {
                // Check if window has expired
                if now.duration_since(*window_start) > self.window_duration {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                clients.insert(client_ip.to_string(), (1, now));
                true
            }
        }
    }

    pub fn cleanup_expired(&self) {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        clients.retain(|_, (_, window_start)| now.duration_since(*window_start) <= self.window_duration);
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Per-IP limit for the credential endpoints (signup, login, tokens).
pub async fn auth_rate_limit_middleware(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let rate_limiter = &state.auth_rate_limiter;

    // Without ConnectInfo (e.g. in-process calls) all requests share one bucket
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !rate_limiter.check_rate_limit(&client_ip) {
        tracing::warn!("Auth rate limit exceeded for IP: {}", client_ip);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "message": "Rate limit exceeded. Please try again later.",
                "retry_after": rate_limiter.window_seconds()
            })),
        ));
    }

    // Occasionally clean up expired entries
    if rand::random::<u8>() < 10 {
        rate_limiter.cleanup_expired();
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_requests_in_window() {
        let limiter = RateLimiter::new(3, 60);
        let now = Instant::now();

        assert!(limiter.check_at("10.0.0.1", now));
        assert!(limiter.check_at("10.0.0.1", now));
        assert!(limiter.check_at("10.0.0.1", now));
        assert!(!limiter.check_at("10.0.0.1", now));

        // Other clients have their own window
        assert!(limiter.check_at("10.0.0.2", now));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(1, 60);
        let start = Instant::now();

        assert!(limiter.check_at("10.0.0.1", start));
        assert!(!limiter.check_at("10.0.0.1", start + Duration::from_secs(30)));
        assert!(limiter.check_at("10.0.0.1", start + Duration::from_secs(61)));
    }

    #[test]
    fn cleanup_keeps_active_clients() {
        let limiter = RateLimiter::new(5, 60);
        limiter.check_rate_limit("10.0.0.1");
        limiter.cleanup_expired();
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
