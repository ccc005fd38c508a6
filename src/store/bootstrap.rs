use uuid::Uuid;

use super::Store;
use crate::auth::token;
use crate::model::User;

/// Create the `admin` user on first run and register `admin_token` as its
/// bearer credential. Does nothing when users already exist or no token is
/// configured.
#[tracing::instrument(skip(store, admin_token), err)]
pub async fn run(store: &dyn Store, admin_token: Option<&str>) -> anyhow::Result<()> {
    if store.count_users().await? > 0 {
        tracing::info!("bootstrap skipped, users already exist");
        return Ok(());
    }

    let Some(raw) = admin_token else {
        tracing::warn!("no users and DOCKHAND_ADMIN_TOKEN unset; API will reject every caller");
        return Ok(());
    };

    let admin = User {
        id: Uuid::new_v4(),
        username: "admin".into(),
        is_admin: true,
    };
    store.create_user(&admin).await?;
    store
        .create_api_token(admin.id, &token::hash_token(raw))
        .await?;

    tracing::info!(user_id = %admin.id, "admin user created");
    Ok(())
}
