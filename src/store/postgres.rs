use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::gateway::{Store, StoreError, StoreResult};
use crate::model::{Container, SourceFile, Tag, Token, User};

/// Postgres-backed `Store`. Uses runtime-checked queries against the schema in
/// `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to Postgres and apply pending migrations.
    #[tracing::instrument(skip(url), err)]
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        tracing::info!("postgres store ready, migrations applied");
        Ok(Self::new(pool))
    }

    async fn load_containers(&self, rows: Vec<ContainerRow>) -> StoreResult<Vec<Container>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let tag_rows: Vec<TagRow> = sqlx::query_as(
            "SELECT id, container_id, name, reference, automated, image_id,
                    manifest_digest, size, last_modified
             FROM tags WHERE container_id = ANY($1)
             ORDER BY name",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let tag_ids: Vec<Uuid> = tag_rows.iter().map(|t| t.id).collect();
        let file_rows: Vec<FileRow> = sqlx::query_as(
            "SELECT id, tag_id, file_type, path, content
             FROM source_files WHERE tag_id = ANY($1)
             ORDER BY file_type",
        )
        .bind(&tag_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut files: HashMap<Uuid, Vec<SourceFile>> = HashMap::new();
        for row in file_rows {
            let tag_id = row.tag_id;
            files.entry(tag_id).or_default().push(row.try_into()?);
        }

        let mut tags: HashMap<Uuid, Vec<Tag>> = HashMap::new();
        for row in tag_rows {
            let container_id = row.container_id;
            let mut tag: Tag = row.into();
            tag.source_files = files.remove(&tag.id).unwrap_or_default();
            tags.entry(container_id).or_default().push(tag);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut container: Container = row.into();
                container.tags = tags.remove(&container.id).unwrap_or_default();
                container
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    is_admin: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            is_admin: row.is_admin,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    user_id: Uuid,
    source: String,
    content: String,
    refresh_token: Option<String>,
    username: Option<String>,
}

impl TryFrom<TokenRow> for Token {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            source: row
                .source
                .parse()
                .map_err(|e: anyhow::Error| StoreError::Corrupt(e.to_string()))?,
            content: row.content,
            refresh_token: row.refresh_token,
            username: row.username,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContainerRow {
    id: Uuid,
    registry: String,
    namespace: String,
    name: String,
    path: String,
    description: Option<String>,
    is_public: bool,
    is_starred: bool,
    git_url: Option<String>,
    has_descriptor: bool,
    last_build: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
}

impl From<ContainerRow> for Container {
    fn from(row: ContainerRow) -> Self {
        Self {
            id: row.id,
            registry: row.registry,
            namespace: row.namespace,
            name: row.name,
            path: row.path,
            description: row.description,
            is_public: row.is_public,
            is_starred: row.is_starred,
            git_url: row.git_url,
            has_descriptor: row.has_descriptor,
            last_build: row.last_build,
            last_updated: row.last_updated,
            tags: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TagRow {
    id: Uuid,
    container_id: Uuid,
    name: String,
    reference: Option<String>,
    automated: bool,
    image_id: Option<String>,
    manifest_digest: Option<String>,
    size: Option<i64>,
    last_modified: Option<String>,
}

impl From<TagRow> for Tag {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            reference: row.reference,
            automated: row.automated,
            image_id: row.image_id,
            manifest_digest: row.manifest_digest,
            size: row.size,
            last_modified: row.last_modified,
            source_files: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    tag_id: Uuid,
    file_type: String,
    path: String,
    content: String,
}

impl TryFrom<FileRow> for SourceFile {
    type Error = StoreError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            file_type: row
                .file_type
                .parse()
                .map_err(|e: anyhow::Error| StoreError::Corrupt(e.to_string()))?,
            path: row.path,
            content: row.content,
        })
    }
}

const CONTAINER_COLUMNS: &str = "c.id, c.registry, c.namespace, c.name, c.path, c.description, \
     c.is_public, c.is_starred, c.git_url, c.has_descriptor, c.last_build, c.last_updated";

fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.code().as_deref() == Some("23505")
    {
        return StoreError::Conflict(db_err.message().to_owned());
    }
    StoreError::Db(err)
}

// ---------------------------------------------------------------------------
// Store impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query("INSERT INTO users (id, username, is_admin) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.username)
            .bind(user.is_admin)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, is_admin FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn count_users(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create_api_token(&self, user_id: Uuid, token_hash: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO api_tokens (token_hash, user_id) VALUES ($1, $2)")
            .bind(token_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_user_by_api_token(&self, token_hash: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT u.id, u.username, u.is_admin
             FROM api_tokens t JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn tokens_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT id, user_id, source, content, refresh_token, username
             FROM tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_token(&self, id: Uuid) -> StoreResult<Option<Token>> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT id, user_id, source, content, refresh_token, username
             FROM tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    #[tracing::instrument(skip(self, token), fields(token_id = %token.id, source = %token.source), err)]
    async fn save_token(&self, token: &Token) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tokens (id, user_id, source, content, refresh_token, username)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, source) DO UPDATE
             SET content = EXCLUDED.content,
                 refresh_token = EXCLUDED.refresh_token,
                 username = EXCLUDED.username",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.source.as_str())
        .bind(&token.content)
        .bind(&token.refresh_token)
        .bind(&token.username)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn containers_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Container>> {
        let rows: Vec<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {CONTAINER_COLUMNS}
             FROM containers c JOIN container_owners o ON o.container_id = c.id
             WHERE o.user_id = $1
             ORDER BY c.path"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.load_containers(rows).await
    }

    async fn find_container(&self, id: Uuid) -> StoreResult<Option<Container>> {
        let row: Option<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(self
            .load_containers(row.into_iter().collect())
            .await?
            .pop())
    }

    async fn find_container_by_path(&self, path: &str) -> StoreResult<Option<Container>> {
        let row: Option<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers c WHERE c.path = $1"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(self
            .load_containers(row.into_iter().collect())
            .await?
            .pop())
    }

    #[tracing::instrument(skip(self, container), fields(path = %container.path), err)]
    async fn save_container(&self, container: &Container) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO containers
                (id, registry, namespace, name, path, description, is_public, is_starred,
                 git_url, has_descriptor, last_build, last_updated)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE
             SET registry = EXCLUDED.registry,
                 description = EXCLUDED.description,
                 is_public = EXCLUDED.is_public,
                 is_starred = EXCLUDED.is_starred,
                 git_url = EXCLUDED.git_url,
                 has_descriptor = EXCLUDED.has_descriptor,
                 last_build = EXCLUDED.last_build,
                 last_updated = EXCLUDED.last_updated",
        )
        .bind(container.id)
        .bind(&container.registry)
        .bind(&container.namespace)
        .bind(&container.name)
        .bind(&container.path)
        .bind(&container.description)
        .bind(container.is_public)
        .bind(container.is_starred)
        .bind(&container.git_url)
        .bind(container.has_descriptor)
        .bind(container.last_build)
        .bind(container.last_updated)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_container(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM containers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_owner(&self, container_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO container_owners (container_id, user_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(container_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn remove_owner(&self, container_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM container_owners WHERE container_id = $1 AND user_id = $2")
            .bind(container_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn owners(&self, container_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let owners: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM container_owners WHERE container_id = $1")
                .bind(container_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(owners)
    }

    async fn save_tag(&self, container_id: Uuid, tag: &Tag) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tags
                (id, container_id, name, reference, automated, image_id,
                 manifest_digest, size, last_modified)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE
             SET reference = EXCLUDED.reference,
                 automated = EXCLUDED.automated,
                 image_id = EXCLUDED.image_id,
                 manifest_digest = EXCLUDED.manifest_digest,
                 size = EXCLUDED.size,
                 last_modified = EXCLUDED.last_modified",
        )
        .bind(tag.id)
        .bind(container_id)
        .bind(&tag.name)
        .bind(&tag.reference)
        .bind(tag.automated)
        .bind(&tag.image_id)
        .bind(&tag.manifest_digest)
        .bind(tag.size)
        .bind(&tag.last_modified)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn delete_tag(&self, tag_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_source_file(&self, tag_id: Uuid, file: &SourceFile) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO source_files (id, tag_id, file_type, path, content)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE
             SET path = EXCLUDED.path, content = EXCLUDED.content",
        )
        .bind(file.id)
        .bind(tag_id)
        .bind(file.file_type.as_str())
        .bind(&file.path)
        .bind(&file.content)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }
}
