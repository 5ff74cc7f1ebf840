use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::warn;
use uuid::Uuid;

use larder_db::Database;
use larder_db::models::UserRow;
use larder_remote::RemoteClient;
use larder_sync::account;
use larder_types::api::{Claims, LoginRequest, LoginResponse, UserResponse};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub remote: RemoteClient,
    pub jwt_secret: String,
}

/// Local-account login. First contact verifies the credentials against the
/// remote recipe service and stores its token; afterwards the argon2 hash
/// decides and the remote service is never consulted.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = account::login_or_create(&state.remote, &state.db, &req.email, &req.password).await?;
    let token = create_token(&state.jwt_secret, &user)?;

    Ok(Json(LoginResponse {
        user: user_response(&user),
        token,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    axum::Extension(claims): axum::Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    Ok(Json(user_response(&user)))
}

/// Resolve the authenticated user's row; a token whose account vanished is
/// treated as unauthorized, not an internal error.
pub fn current_user(state: &AppState, claims: &Claims) -> Result<UserRow, ApiError> {
    state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::new(axum::http::StatusCode::UNAUTHORIZED, "token_invalid"))
}

pub fn user_response(user: &UserRow) -> UserResponse {
    UserResponse {
        id: parse_uuid(&user.id),
        name: user.name.clone(),
        email: user.email.clone(),
        partner_code: user.partner_code.clone(),
    }
}

pub fn parse_uuid(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt user id '{}': {}", raw, e);
        Uuid::default()
    })
}

fn create_token(secret: &str, user: &UserRow) -> Result<String, ApiError> {
    let claims = Claims {
        sub: parse_uuid(&user.id),
        email: user.email.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| ApiError::internal())
}
