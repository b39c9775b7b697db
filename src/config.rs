// src/config.rs
//! Runtime configuration read from the environment (after `.env` is loaded).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEV_JWT_SECRET: &str = "default_secret";

// Upper bounds keep token expiry and cleanup cutoffs inside chrono's range
const MAX_ACCESS_TOKEN_MINUTES: i64 = 60 * 24 * 365;
const MAX_REFRESH_TOKEN_HOURS: i64 = 24 * 365 * 10;
const MAX_CLEANUP_INTERVAL_HOURS: i64 = 24 * 365;
const MAX_CHAT_RETENTION_DAYS: i64 = 365 * 100;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}': expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub gemini: Option<GeminiConfig>,
    pub knowledge_base_path: PathBuf,
    pub knowledge_base_eager: bool,
    pub qdrant: Option<QdrantConfig>,
    pub email: Option<EmailConfig>,
    pub email_from: String,
    pub cleanup_interval: Duration,
    pub chat_retention_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set, using an insecure development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let gemini = get("GEMINI_API_KEY").map(|api_key| GeminiConfig {
            api_key,
            base_url: get("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "gemini-embedding-001".to_string()),
            generation_model: get("GENERATION_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
        });

        let qdrant = get("QDRANT_URL").map(|url| QdrantConfig {
            url,
            api_key: get("QDRANT_API_KEY"),
            collection: get("QDRANT_COLLECTION").unwrap_or_else(|| "knowledge_base".to_string()),
        });

        let email = match (get("EMAIL_API_URL"), get("EMAIL_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(EmailConfig { api_url, api_key }),
            _ => None,
        };

        let access_minutes: i64 = parse_number(&get, "ACCESS_TOKEN_MINUTES", 5)?;
        let refresh_hours: i64 = parse_number(&get, "REFRESH_TOKEN_HOURS", 24)?;
        let cleanup_hours: u64 = parse_number(&get, "CLEANUP_INTERVAL_HOURS", 24)?;
        let chat_retention_days: i64 = parse_number(&get, "CHAT_RETENTION_DAYS", 30)?;

        within("ACCESS_TOKEN_MINUTES", access_minutes, MAX_ACCESS_TOKEN_MINUTES)?;
        within("REFRESH_TOKEN_HOURS", refresh_hours, MAX_REFRESH_TOKEN_HOURS)?;
        within("CLEANUP_INTERVAL_HOURS", cleanup_hours as i64, MAX_CLEANUP_INTERVAL_HOURS)?;
        within("CHAT_RETENTION_DAYS", chat_retention_days, MAX_CHAT_RETENTION_DAYS)?;

        let access_token_ttl = chrono::Duration::try_minutes(access_minutes)
            .ok_or_else(|| out_of_range("ACCESS_TOKEN_MINUTES", access_minutes))?;
        let refresh_token_ttl = chrono::Duration::try_hours(refresh_hours)
            .ok_or_else(|| out_of_range("REFRESH_TOKEN_HOURS", refresh_hours))?;

        Ok(Self {
            database_url,
            db_max_connections: parse_number(&get, "DB_MAX_CONNECTIONS", 5)?,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            gemini,
            knowledge_base_path: get("KNOWLEDGE_BASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/knowledge_base.txt")),
            knowledge_base_eager: parse_bool(&get, "KNOWLEDGE_BASE_EAGER", false)?,
            qdrant,
            email,
            email_from: get("EMAIL_FROM").unwrap_or_else(|| "noreply@example.com".to_string()),
            cleanup_interval: Duration::from_secs(cleanup_hours * 3600),
            chat_retention_days,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_number<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
            expected: "a number",
        }),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value: raw,
                expected: "true or false",
            }),
        },
        None => Ok(default),
    }
}

fn out_of_range(name: &'static str, value: i64) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        expected: "a positive number within the allowed range",
    }
}

fn within(name: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if value <= 0 || value > max {
        return Err(out_of_range(name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/chat")]).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.access_token_ttl, chrono::Duration::minutes(5));
        assert_eq!(config.refresh_token_ttl, chrono::Duration::hours(24));
        assert_eq!(config.cleanup_interval, Duration::from_secs(24 * 3600));
        assert_eq!(config.chat_retention_days, 30);
        assert_eq!(config.knowledge_base_path, PathBuf::from("data/knowledge_base.txt"));
        assert!(config.gemini.is_none());
        assert!(config.qdrant.is_none());
        assert!(config.email.is_none());
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = config_from(&[("JWT_SECRET", "s3cret")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("GEMINI_API_KEY", "  "),
            ("QDRANT_URL", ""),
        ])
        .unwrap();
        assert!(config.gemini.is_none());
        assert!(config.qdrant.is_none());
    }

    #[test]
    fn gemini_models_default_and_override() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("GEMINI_API_KEY", "key"),
            ("GENERATION_MODEL", "gemini-2.0-pro"),
        ])
        .unwrap();
        let gemini = config.gemini.unwrap();
        assert_eq!(gemini.embedding_model, "gemini-embedding-001");
        assert_eq!(gemini.generation_model, "gemini-2.0-pro");
    }

    #[test]
    fn email_requires_url_and_key() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("EMAIL_API_URL", "https://mail.example.com/emails"),
        ])
        .unwrap();
        assert!(config.email.is_none());
    }

    #[test]
    fn invalid_number_names_the_variable() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("CHAT_RETENTION_DAYS", "thirty"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("CHAT_RETENTION_DAYS"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("CLEANUP_INTERVAL_HOURS", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "CLEANUP_INTERVAL_HOURS", .. }));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("KNOWLEDGE_BASE_EAGER", "maybe"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "KNOWLEDGE_BASE_EAGER", .. }));
    }

    #[test]
    fn oversized_durations_are_rejected_at_startup() {
        for (name, value) in [
            ("ACCESS_TOKEN_MINUTES", "600000000000"),
            ("REFRESH_TOKEN_HOURS", "10000000000"),
            ("CLEANUP_INTERVAL_HOURS", "18446744073709551615"),
            ("CHAT_RETENTION_DAYS", "1000000000000"),
        ] {
            let err = config_from(&[("DATABASE_URL", "postgres://localhost/chat"), (name, value)])
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { name: n, .. } if n == name),
                "{} = {} gave {:?}",
                name,
                value,
                err
            );
        }
    }

    #[test]
    fn largest_accepted_values_stay_usable() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("REFRESH_TOKEN_HOURS", &MAX_REFRESH_TOKEN_HOURS.to_string()),
            ("CHAT_RETENTION_DAYS", &MAX_CHAT_RETENTION_DAYS.to_string()),
        ])
        .unwrap();

        let now = chrono::Utc::now();
        assert!(now.checked_add_signed(config.refresh_token_ttl).is_some());
        assert!(crate::jobs::cleanup::cleanup_cutoff(now, config.chat_retention_days).is_some());
    }
}
