use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::gateway::{Store, StoreError, StoreResult};
use crate::model::{Container, SourceFile, Tag, Token, User};

/// In-memory `Store` used by tests and `serve --memory`.
///
/// Rows are kept flat (containers, tags, files in separate maps) so that the
/// gateway semantics match the relational backend: saving a container never
/// touches its tags.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    writes: AtomicU64,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    api_tokens: HashMap<String, Uuid>,
    tokens: HashMap<Uuid, Token>,
    containers: HashMap<Uuid, Container>,
    owners: BTreeSet<(Uuid, Uuid)>,
    /// tag id -> (container id, tag without files)
    tags: HashMap<Uuid, (Uuid, Tag)>,
    /// file id -> (tag id, file)
    files: HashMap<Uuid, (Uuid, SourceFile)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls served so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Inner {
    fn assemble(&self, container: &Container) -> Container {
        let mut out = container.clone();
        let mut tags: Vec<Tag> = self
            .tags
            .iter()
            .filter(|(_, (cid, _))| *cid == container.id)
            .map(|(tag_id, (_, tag))| {
                let mut tag = tag.clone();
                tag.source_files = self
                    .files
                    .values()
                    .filter(|(tid, _)| tid == tag_id)
                    .map(|(_, f)| f.clone())
                    .collect();
                tag.source_files.sort_by_key(|f| f.file_type.as_str());
                tag
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        out.tags = tags;
        out
    }

    fn drop_tag(&mut self, tag_id: Uuid) {
        self.tags.remove(&tag_id);
        self.files.retain(|_, (tid, _)| *tid != tag_id);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "user {} already exists",
                user.username
            )));
        }
        inner.users.insert(user.id, user.clone());
        self.wrote();
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn count_users(&self) -> StoreResult<i64> {
        let count = self.inner.read().await.users.len();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn create_api_token(&self, user_id: Uuid, token_hash: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound("user"));
        }
        inner.api_tokens.insert(token_hash.to_owned(), user_id);
        self.wrote();
        Ok(())
    }

    async fn find_user_by_api_token(&self, token_hash: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .api_tokens
            .get(token_hash)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn tokens_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Token>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_token(&self, id: Uuid) -> StoreResult<Option<Token>> {
        Ok(self.inner.read().await.tokens.get(&id).cloned())
    }

    async fn save_token(&self, token: &Token) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        // One token per (user, source): a new id for an existing pair replaces it.
        inner
            .tokens
            .retain(|id, t| *id == token.id || t.user_id != token.user_id || t.source != token.source);
        inner.tokens.insert(token.id, token.clone());
        self.wrote();
        Ok(())
    }

    async fn containers_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Container>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Container> = inner
            .owners
            .iter()
            .filter(|(_, uid)| *uid == user_id)
            .filter_map(|(cid, _)| inner.containers.get(cid))
            .map(|c| inner.assemble(c))
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn find_container(&self, id: Uuid) -> StoreResult<Option<Container>> {
        let inner = self.inner.read().await;
        Ok(inner.containers.get(&id).map(|c| inner.assemble(c)))
    }

    async fn find_container_by_path(&self, path: &str) -> StoreResult<Option<Container>> {
        let inner = self.inner.read().await;
        Ok(inner
            .containers
            .values()
            .find(|c| c.path == path)
            .map(|c| inner.assemble(c)))
    }

    async fn save_container(&self, container: &Container) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .containers
            .values()
            .any(|c| c.path == container.path && c.id != container.id)
        {
            return Err(StoreError::Conflict(format!(
                "container path {} already exists",
                container.path
            )));
        }
        let mut row = container.clone();
        row.tags.clear();
        inner.containers.insert(row.id, row);
        self.wrote();
        Ok(())
    }

    async fn delete_container(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.containers.remove(&id);
        inner.owners.retain(|(cid, _)| *cid != id);
        let tag_ids: Vec<Uuid> = inner
            .tags
            .iter()
            .filter(|(_, (cid, _))| *cid == id)
            .map(|(tid, _)| *tid)
            .collect();
        for tag_id in tag_ids {
            inner.drop_tag(tag_id);
        }
        self.wrote();
        Ok(())
    }

    async fn add_owner(&self, container_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.containers.contains_key(&container_id) {
            return Err(StoreError::NotFound("container"));
        }
        inner.owners.insert((container_id, user_id));
        self.wrote();
        Ok(())
    }

    async fn remove_owner(&self, container_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .owners
            .remove(&(container_id, user_id));
        self.wrote();
        Ok(())
    }

    async fn owners(&self, container_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .owners
            .iter()
            .filter(|(cid, _)| *cid == container_id)
            .map(|(_, uid)| *uid)
            .collect())
    }

    async fn save_tag(&self, container_id: Uuid, tag: &Tag) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.containers.contains_key(&container_id) {
            return Err(StoreError::NotFound("container"));
        }
        if inner
            .tags
            .iter()
            .any(|(id, (cid, t))| *cid == container_id && t.name == tag.name && *id != tag.id)
        {
            return Err(StoreError::Conflict(format!("tag {} already exists", tag.name)));
        }
        let mut row = tag.clone();
        row.source_files.clear();
        inner.tags.insert(row.id, (container_id, row));
        self.wrote();
        Ok(())
    }

    async fn delete_tag(&self, tag_id: Uuid) -> StoreResult<()> {
        self.inner.write().await.drop_tag(tag_id);
        self.wrote();
        Ok(())
    }

    async fn save_source_file(&self, tag_id: Uuid, file: &SourceFile) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tags.contains_key(&tag_id) {
            return Err(StoreError::NotFound("tag"));
        }
        if inner
            .files
            .iter()
            .any(|(id, (tid, f))| *tid == tag_id && f.file_type == file.file_type && *id != file.id)
        {
            return Err(StoreError::Conflict(format!(
                "file of type {} already exists",
                file.file_type.as_str()
            )));
        }
        inner.files.insert(file.id, (tag_id, file.clone()));
        self.wrote();
        Ok(())
    }
}
