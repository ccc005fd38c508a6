use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::helpers::require_admin;
use crate::auth::middleware::AuthUser;
use crate::auth::token;
use crate::error::ApiError;
use crate::model::User;
use crate::store::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// The raw API token is returned once, at creation.
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user: User,
    pub token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/users", post(create_user))
}

async fn me(auth: AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "id": auth.user_id,
        "username": auth.user_name,
        "is_admin": auth.is_admin,
    }))
}

#[tracing::instrument(skip(state, auth, body), fields(caller = %auth.user_id, username = %body.username), err)]
async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    require_admin(&auth)?;

    let username = body.username.trim();
    if username.is_empty() || username.len() > 255 {
        return Err(ApiError::BadRequest(
            "username must be 1-255 characters".into(),
        ));
    }

    let user = User {
        id: Uuid::new_v4(),
        username: username.to_owned(),
        is_admin: body.is_admin,
    };
    state.store.create_user(&user).await?;

    let (raw, hash) = token::generate_api_token();
    state.store.create_api_token(user.id, &hash).await?;

    tracing::info!(user_id = %user.id, "user created");
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse { user, token: raw }),
    ))
}
