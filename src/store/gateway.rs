use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Container, SourceFile, Tag, Token, User};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Persistence gateway used by the reconciliation engine, the token lifecycle
/// manager and the HTTP surface.
///
/// Containers returned by the `find_*`/`containers_*` methods carry their tags,
/// and each tag carries its source files. `save_container` writes the container
/// row only; tags and files are written through their own methods.
#[async_trait]
pub trait Store: Send + Sync {
    // -- users --------------------------------------------------------------

    async fn create_user(&self, user: &User) -> StoreResult<()>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn count_users(&self) -> StoreResult<i64>;

    /// Register the SHA-256 hash of a bearer credential for a user.
    async fn create_api_token(&self, user_id: Uuid, token_hash: &str) -> StoreResult<()>;

    async fn find_user_by_api_token(&self, token_hash: &str) -> StoreResult<Option<User>>;

    // -- provider tokens ----------------------------------------------------

    async fn tokens_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Token>>;

    async fn find_token(&self, id: Uuid) -> StoreResult<Option<Token>>;

    /// Insert or update, keyed by `(user_id, source)`.
    async fn save_token(&self, token: &Token) -> StoreResult<()>;

    // -- containers ---------------------------------------------------------

    async fn containers_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Container>>;

    async fn find_container(&self, id: Uuid) -> StoreResult<Option<Container>>;

    async fn find_container_by_path(&self, path: &str) -> StoreResult<Option<Container>>;

    /// Insert or update the container row, keyed by id.
    async fn save_container(&self, container: &Container) -> StoreResult<()>;

    /// Delete a container together with its tags, files and owner rows.
    async fn delete_container(&self, id: Uuid) -> StoreResult<()>;

    async fn add_owner(&self, container_id: Uuid, user_id: Uuid) -> StoreResult<()>;

    async fn remove_owner(&self, container_id: Uuid, user_id: Uuid) -> StoreResult<()>;

    async fn owners(&self, container_id: Uuid) -> StoreResult<Vec<Uuid>>;

    // -- tags and files -----------------------------------------------------

    /// Insert or update the tag row, keyed by id.
    async fn save_tag(&self, container_id: Uuid, tag: &Tag) -> StoreResult<()>;

    /// Delete a tag together with its files.
    async fn delete_tag(&self, tag_id: Uuid) -> StoreResult<()>;

    /// Insert or update the file row, keyed by id.
    async fn save_source_file(&self, tag_id: Uuid, file: &SourceFile) -> StoreResult<()>;
}
