use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use super::helpers::require_admin_or_self;
use crate::auth::middleware::AuthUser;
use crate::auth::oauth::{self, ClientCredentials, OAuthError};
use crate::error::ApiError;
use crate::model::{Token, TokenSource};
use crate::store::AppState;

/// Token as exposed over HTTP. Secrets never leave the store.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: TokenSource,
    pub username: Option<String>,
    pub has_refresh_token: bool,
}

impl From<Token> for TokenResponse {
    fn from(t: Token) -> Self {
        Self {
            id: t.id,
            user_id: t.user_id,
            source: t.source,
            username: t.username,
            has_refresh_token: t.refresh_token.is_some(),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/tokens/{id}/refresh", post(refresh_token))
}

#[tracing::instrument(skip(state, auth), fields(caller = %auth.user_id), err)]
async fn refresh_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state
        .store
        .find_token(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("token".into()))?;
    require_admin_or_self(&auth, token.user_id)?;

    if token.source != TokenSource::BitbucketOrg {
        return Err(ApiError::BadRequest(format!(
            "{} tokens cannot be refreshed",
            token.source
        )));
    }

    let config = &state.config;
    let (Some(client_id), Some(client_secret)) = (
        config.bitbucket_client_id.as_deref(),
        config.bitbucket_client_secret.as_deref(),
    ) else {
        return Err(OAuthError::NotConfigured.into());
    };
    let token_url = format!("{}site/oauth2/access_token", config.endpoints.bitbucket);

    let refreshed = oauth::refresh_token(
        &state.http,
        state.store.as_ref(),
        token,
        ClientCredentials {
            token_url: &token_url,
            client_id,
            client_secret,
        },
    )
    .await?;
    Ok(Json(refreshed.into()))
}
