use serde::Deserialize;

use crate::error::ApiError;
use crate::model::Token;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("token has no refresh token")]
    NoRefreshToken,

    #[error("client credentials not configured")]
    NotConfigured,

    #[error("token exchange failed: {0}")]
    Exchange(#[from] reqwest::Error),

    #[error("token endpoint returned status {0}")]
    Status(u16),

    #[error("token endpoint returned an empty body")]
    EmptyBody,

    #[error("token response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::NoRefreshToken => Self::BadRequest(err.to_string()),
            OAuthError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            OAuthError::Store(e) => Self::from(e),
            _ => Self::Internal(err.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth client registration used for the refresh-token grant.
#[derive(Debug, Clone, Copy)]
pub struct ClientCredentials<'a> {
    pub token_url: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// Exchange `token`'s refresh token for a new access token, persist both and
/// return the token as stored. Nothing is written on failure.
#[tracing::instrument(
    skip(http, store, token, client),
    fields(token_id = %token.id, source = %token.source),
    err
)]
pub async fn refresh_token(
    http: &reqwest::Client,
    store: &dyn Store,
    mut token: Token,
    client: ClientCredentials<'_>,
) -> Result<Token, OAuthError> {
    let refresh = token
        .refresh_token
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or(OAuthError::NoRefreshToken)?;

    let resp = http
        .post(client.token_url)
        .basic_auth(client.client_id, Some(client.client_secret))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh)])
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(OAuthError::Status(status.as_u16()));
    }

    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Err(OAuthError::EmptyBody);
    }
    let parsed: TokenResponse = serde_json::from_str(&body)?;

    token.content = parsed.access_token;
    if let Some(next) = parsed.refresh_token {
        token.refresh_token = Some(next);
    }
    store.save_token(&token).await?;
    tracing::info!("token refreshed");

    Ok(store
        .find_token(token.id)
        .await?
        .ok_or(StoreError::NotFound("token"))?)
}
