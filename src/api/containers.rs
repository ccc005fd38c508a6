use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use super::helpers::{require_admin_or_owner, require_admin_or_self};
use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::model::Container;
use crate::store::AppState;
use crate::sync::{self, SyncContext};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/{id}/containers", get(list_user_containers))
        .route(
            "/api/users/{id}/containers/refresh",
            post(refresh_user_containers),
        )
        .route("/api/containers/{id}", get(get_container))
}

#[tracing::instrument(skip(state, auth), fields(caller = %auth.user_id), err)]
async fn refresh_user_containers(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Container>>, ApiError> {
    require_admin_or_self(&auth, id)?;

    let ctx = SyncContext::from_state(&state);
    let cancel = state.shutdown.child_token();
    let containers = sync::refresh(&ctx, id, &cancel).await?;
    Ok(Json(containers))
}

#[tracing::instrument(skip(state, auth), fields(caller = %auth.user_id), err)]
async fn list_user_containers(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Container>>, ApiError> {
    require_admin_or_self(&auth, id)?;

    state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user".into()))?;
    Ok(Json(state.store.containers_for_user(id).await?))
}

#[tracing::instrument(skip(state, auth), fields(caller = %auth.user_id), err)]
async fn get_container(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Container>, ApiError> {
    let container = state
        .store
        .find_container(id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("container not found".into()))?;
    require_admin_or_owner(&state, &auth, &container).await?;
    Ok(Json(container))
}
