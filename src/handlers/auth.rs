use crate::error::ApiError;
use crate::jobs::run_email_background;
use crate::middleware::rate_limit::auth_rate_limit_middleware;
use crate::models::auth::*;
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::{post, Router},
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_USERNAME_LENGTH: usize = 150;
const BAD_CREDENTIALS: &str = "No active account found with the given credentials";

/// Signing keys and lifetimes for access/refresh tokens.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, access_ttl: chrono::Duration, refresh_ttl: chrono::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    fn ttl(&self, token_type: TokenType) -> chrono::Duration {
        match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        }
    }
}

pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/signup/", post(signup))
        .route("/api/login/", post(login))
        .route("/api/token/refresh/", post(refresh_token))
        .route("/api/token/verify/", post(verify_token))
        .layer(axum::middleware::from_fn(auth_rate_limit_middleware))
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[\w.@+-]+$").expect("valid username regex"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !username_pattern().is_match(username) {
        return Err(ApiError::BadRequest(
            "Username may contain only letters, numbers, and @/./+/-/_ characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    if !email.is_empty() && !email_pattern().is_match(email) {
        return Err(ApiError::BadRequest("Enter a valid email address".to_string()));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::Internal(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Error hashing password: {}", e)))
}

async fn check_password(password: String, password_hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .map_err(|e| ApiError::Internal(format!("Password check task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Error verifying password: {}", e)))
}

/// Runs a bcrypt check against a throwaway hash so unknown usernames cost
/// as much as wrong passwords.
async fn spend_password_check(password: String) -> bool {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();

    tokio::task::spawn_blocking(move || {
        let dummy = DUMMY_HASH.get_or_init(|| hash("not-a-real-password", DEFAULT_COST).unwrap_or_default());
        verify(password, dummy).unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

async fn signup(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let username = payload.username.trim().to_string();
    let email = payload.email.unwrap_or_default().trim().to_string();

    // Validate input
    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&payload.password)?;

    // Check if user already exists
    let existing_user = sqlx::query("SELECT id FROM users WHERE username = $1")
        .bind(&username)
        .fetch_optional(&state.db_pool)
        .await?;

    if existing_user.is_some() {
        return Err(ApiError::Conflict(
            "A user with that username already exists".to_string(),
        ));
    }

    let password_hash = hash_password(payload.password).await?;

    // Self-registered users are never staff or superuser
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, password_hash, is_active, is_staff, is_superuser, date_joined)
         VALUES ($1, $2, $3, true, false, false, NOW())
         RETURNING id, username, email, password_hash, is_active, is_staff, is_superuser, date_joined",
    )
    .bind(&username)
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict("A user with that username already exists".to_string())
        } else {
            ApiError::Database(e)
        }
    })?;

    tracing::info!(user_id = user.id, "Registered new user: {}", user.username);

    // Trigger background email
    if !user.email.is_empty() {
        run_email_background(state.mailer.clone(), &state.email_from, &user.email, &user.username);
    }

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    // Validate input
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, is_active, is_staff, is_superuser, date_joined
         FROM users WHERE username = $1",
    )
    .bind(payload.username.trim())
    .fetch_optional(&state.db_pool)
    .await?;

    let Some(user) = user.filter(|user| user.is_active) else {
        spend_password_check(payload.password).await;
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
    };

    if !check_password(payload.password, user.password_hash.clone()).await? {
        tracing::warn!("Failed login attempt for user: {}", user.username);
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
    }

    let tokens = issue_token_pair(&state.jwt, &user)?;
    tracing::info!(user_id = user.id, "User logged in");

    Ok(Json(tokens))
}

async fn refresh_token(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AccessTokenResponse>, ApiError> {
    if payload.refresh.trim().is_empty() {
        return Err(ApiError::BadRequest("Refresh token is required".to_string()));
    }

    let claims = verify_token_of_type(&state.jwt, payload.refresh.trim(), TokenType::Refresh)?;
    let user = load_active_user(&state, &claims).await?;

    let access = generate_jwt_token(&state.jwt, user.id, &user.username, TokenType::Access)?;
    Ok(Json(AccessTokenResponse { access }))
}

async fn verify_token(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if payload.token.trim().is_empty() {
        return Err(ApiError::BadRequest("Token is required".to_string()));
    }

    verify_jwt_token(&state.jwt, payload.token.trim()).map_err(|e| {
        tracing::debug!("Token verification failed: {}", e);
        ApiError::Unauthorized("Token is invalid or expired".to_string())
    })?;

    Ok(Json(serde_json::json!({})))
}

/// Loads the user a token was issued to, rejecting unknown or inactive
/// accounts.
pub async fn load_active_user(state: &AppState, claims: &Claims) -> Result<User, ApiError> {
    let user_id = claims
        .user_id()
        .ok_or_else(|| ApiError::Unauthorized("Token contained no recognizable user identification".to_string()))?;

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, is_active, is_staff, is_superuser, date_joined
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("User is inactive".to_string()));
    }
    Ok(user)
}

pub fn generate_jwt_token(
    keys: &JwtKeys,
    user_id: i64,
    username: &str,
    token_type: TokenType,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        token_type,
        jti: Uuid::new_v4().to_string(),
        exp: now
            .checked_add_signed(keys.ttl(token_type))
            .ok_or_else(|| ApiError::Internal("Token lifetime overflows the clock".to_string()))?
            .timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(&Header::default(), &claims, &keys.encoding)
        .map_err(|e| ApiError::Internal(format!("Error generating JWT token: {}", e)))
}

pub fn issue_token_pair(keys: &JwtKeys, user: &User) -> Result<TokenPairResponse, ApiError> {
    Ok(TokenPairResponse {
        access: generate_jwt_token(keys, user.id, &user.username, TokenType::Access)?,
        refresh: generate_jwt_token(keys, user.id, &user.username, TokenType::Refresh)?,
    })
}

pub fn verify_jwt_token(keys: &JwtKeys, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(token, &keys.decoding, &Validation::default())?;
    Ok(token_data.claims)
}

/// Verifies signature and expiry, then requires the given token type.
pub fn verify_token_of_type(
    keys: &JwtKeys,
    token: &str,
    expected: TokenType,
) -> Result<Claims, ApiError> {
    let claims = verify_jwt_token(keys, token).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        ApiError::Unauthorized("Invalid or expired token".to_string())
    })?;

    if claims.token_type != expected {
        return Err(ApiError::Unauthorized("Token has wrong type".to_string()));
    }
    Ok(claims)
}
