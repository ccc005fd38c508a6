use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::auth::token;
use crate::error::ApiError;
use crate::model::User;
use crate::store::AppState;

/// Authenticated caller, resolved from an `Authorization: Bearer` API token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub user_name: String,
    pub is_admin: bool,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            user_name: user.username,
            is_admin: user.is_admin,
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw_token = extract_bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let user = state
            .store
            .find_user_by_api_token(&token::hash_token(&raw_token))
            .await?
            .ok_or(ApiError::Unauthorized)?;
        Ok(user.into())
    }
}

fn extract_bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_owned())
}
