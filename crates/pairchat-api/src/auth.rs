use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use pairchat_core::DeliveryCoordinator;
use pairchat_db::Database;
use pairchat_db::models::CreateUser;
use pairchat_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub coordinator: DeliveryCoordinator<Database>,
}

fn valid_credentials(username: &str, password: &str) -> bool {
    (3..=32).contains(&username.chars().count())
        && !username.trim().is_empty()
        && password.len() >= 8
}

/// Run blocking auth work (SQLite, Argon2) off the async workers.
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("{} failed: {}", what, e); StatusCode::INTERNAL_SERVER_ERROR })
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !valid_credentials(&req.username, &req.password) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let username = req.username.clone();
    let password = req.password;

    // Hash with Argon2id, then insert; a taken username comes back as Duplicate
    let outcome = blocking("register", move || {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("password hashing: {}", e))?
            .to_string();
        db.create_user(&user_id.to_string(), &username, &password_hash)
    })
    .await?;

    if let CreateUser::Duplicate = outcome {
        return Err(StatusCode::CONFLICT);
    }

    let token = create_token(&state.jwt_secret, state.token_ttl_days, user_id, &req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("registered {} ({})", req.username, user_id);
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();

    // None for both an unknown name and a wrong password
    let user = blocking("login", move || {
        let Some(user) = db.get_user_by_username(&req.username)? else {
            return Ok(None);
        };
        let parsed_hash =
            PasswordHash::new(&user.password).map_err(|e| anyhow!("stored hash: {}", e))?;
        Ok(Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .ok()
            .map(|_| user))
    })
    .await?
    .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, state.token_ttl_days, user_id, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

pub fn create_token(secret: &str, ttl_days: i64, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(ttl_days)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
