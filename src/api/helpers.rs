use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::model::Container;
use crate::store::AppState;

pub fn require_admin(auth: &AuthUser) -> Result<(), ApiError> {
    if !auth.is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Admins may act on anyone; everyone else only on themselves.
pub fn require_admin_or_self(auth: &AuthUser, user_id: Uuid) -> Result<(), ApiError> {
    if !auth.is_admin && auth.user_id != user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Admins may read any container; everyone else only containers they own.
pub async fn require_admin_or_owner(
    state: &AppState,
    auth: &AuthUser,
    container: &Container,
) -> Result<(), ApiError> {
    if auth.is_admin {
        return Ok(());
    }
    let owners = state.store.owners(container.id).await?;
    if !owners.contains(&auth.user_id) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}
