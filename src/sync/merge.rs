use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::fetch::Fetched;
use super::{SyncContext, SyncError};
use crate::model::{Container, Observed, Tag};

/// What a merge did, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub created: usize,
    pub updated: usize,
    pub orphaned: usize,
    pub deleted: usize,
}

/// Split the user's current containers into those still reported by the
/// registry and those that are not.
pub fn partition_orphans(current: Vec<Container>, fresh: &[Fetched]) -> (Vec<Container>, Vec<Container>) {
    current
        .into_iter()
        .partition(|c| fresh.iter().any(|f| f.container.same_identity(c)))
}

/// Reconcile fetched remote state with the store for `user_id`.
#[tracing::instrument(skip_all, fields(user_id = %user_id, fresh = fetched.len()), err)]
pub async fn apply(
    ctx: &SyncContext,
    user_id: Uuid,
    fetched: Vec<Fetched>,
    cancel: &CancellationToken,
) -> Result<MergeSummary, SyncError> {
    let current = ctx.store.containers_for_user(user_id).await?;
    let (_, orphans) = partition_orphans(current, &fetched);
    let mut summary = MergeSummary {
        orphaned: orphans.len(),
        ..MergeSummary::default()
    };

    for Fetched {
        container,
        tags,
        observed,
    } in fetched
    {
        if cancel.is_cancelled() {
            tracing::warn!(path = %container.path, "refresh cancelled during merge");
            return Err(SyncError::Cancelled);
        }
        let created = commit_container(ctx, user_id, container, tags, observed).await?;
        if created {
            summary.created += 1;
        } else {
            summary.updated += 1;
        }
    }

    for orphan in orphans {
        if release(ctx, user_id, &orphan).await? {
            summary.deleted += 1;
        }
    }

    tracing::info!(?summary, "merge complete");
    Ok(summary)
}

/// Match-or-create one container, stamp and own it, then merge its tags.
/// Returns whether the container was newly created.
#[tracing::instrument(skip_all, fields(path = %fresh.path), err)]
async fn commit_container(
    ctx: &SyncContext,
    user_id: Uuid,
    fresh: Container,
    fresh_tags: Option<Vec<Tag>>,
    observed: Observed,
) -> Result<bool, SyncError> {
    let _guard = ctx.locks.lock(&fresh.path).await;

    let (mut working, created) = match ctx.store.find_container_by_path(&fresh.path).await? {
        Some(mut existing) => {
            let changes = existing.merge_from(&fresh, observed);
            if !changes.is_empty() {
                tracing::debug!(fields = ?changes.fields(), "container updated");
            }
            (existing, false)
        }
        None => {
            let mut adopted = fresh;
            adopted.tags.clear();
            tracing::info!("container created");
            (adopted, true)
        }
    };

    working.last_updated = Some(Utc::now());
    ctx.store.save_container(&working).await?;
    ctx.store.add_owner(working.id, user_id).await?;

    match fresh_tags {
        Some(fresh_tags) => merge_tags(ctx, &mut working, fresh_tags).await?,
        None => tracing::warn!("tag lookup failed, existing tags left untouched"),
    }
    Ok(created)
}

/// Tag-level merge for one committed container. Only rows whose fields
/// changed are written.
async fn merge_tags(
    ctx: &SyncContext,
    container: &mut Container,
    fresh_tags: Vec<Tag>,
) -> Result<(), SyncError> {
    let (kept, stale): (Vec<Tag>, Vec<Tag>) = std::mem::take(&mut container.tags)
        .into_iter()
        .partition(|t| fresh_tags.iter().any(|f| f.name == t.name));
    for tag in stale {
        tracing::debug!(tag = %tag.name, "tag no longer reported");
        ctx.store.delete_tag(tag.id).await?;
    }
    container.tags = kept;

    for fresh in fresh_tags {
        let idx = match container.tags.iter().position(|t| t.name == fresh.name) {
            Some(idx) => {
                let changes = container.tags[idx].merge_from(&fresh);
                if !changes.is_empty() {
                    ctx.store.save_tag(container.id, &container.tags[idx]).await?;
                }
                idx
            }
            None => {
                let mut adopted = fresh.clone();
                adopted.source_files.clear();
                ctx.store.save_tag(container.id, &adopted).await?;
                container.tags.push(adopted);
                container.tags.len() - 1
            }
        };
        merge_files(ctx, &mut container.tags[idx], &fresh).await?;
    }
    Ok(())
}

/// One file per type: a fresh file replaces the content of the existing file
/// of its type, otherwise it is added.
async fn merge_files(ctx: &SyncContext, tag: &mut Tag, fresh: &Tag) -> Result<(), SyncError> {
    for file in &fresh.source_files {
        match tag
            .source_files
            .iter_mut()
            .find(|f| f.file_type == file.file_type)
        {
            Some(existing) => {
                if existing.content != file.content || existing.path != file.path {
                    existing.content.clone_from(&file.content);
                    existing.path.clone_from(&file.path);
                    ctx.store.save_source_file(tag.id, existing).await?;
                }
            }
            None => {
                ctx.store.save_source_file(tag.id, file).await?;
                tag.source_files.push(file.clone());
            }
        }
    }
    Ok(())
}

/// Drop `user_id` from an orphaned container's owners and delete it when no
/// owner remains. Returns whether it was deleted.
#[tracing::instrument(skip_all, fields(path = %orphan.path), err)]
async fn release(ctx: &SyncContext, user_id: Uuid, orphan: &Container) -> Result<bool, SyncError> {
    let _guard = ctx.locks.lock(&orphan.path).await;

    ctx.store.remove_owner(orphan.id, user_id).await?;
    if !ctx.store.owners(orphan.id).await?.is_empty() {
        tracing::info!("orphan still owned by other users");
        return Ok(false);
    }
    ctx.store.delete_container(orphan.id).await?;
    tracing::info!("orphan deleted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Endpoints;
    use crate::model::{FileType, SourceFile};
    use crate::store::{MemoryStore, PathLocks, Store};

    fn fetched(name: &str) -> Fetched {
        Fetched {
            container: Container::candidate("quay.io", "ns", name),
            tags: Some(Vec::new()),
            observed: Observed::ALL,
        }
    }

    #[test]
    fn orphans_are_containers_missing_from_fresh() {
        let current = vec![
            Container::candidate("quay.io", "ns", "kept"),
            Container::candidate("quay.io", "ns", "gone"),
        ];
        let (kept, orphans) = partition_orphans(current, &[fetched("kept"), fetched("new")]);

        assert_eq!(kept.len(), 1);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].name, "gone");
    }

    #[test]
    fn orphan_match_is_case_sensitive() {
        let current = vec![Container::candidate("quay.io", "ns", "Tool")];
        let (_, orphans) = partition_orphans(current, &[fetched("tool")]);
        assert_eq!(orphans.len(), 1);
    }

    #[tokio::test]
    async fn same_file_type_twice_keeps_one_row_with_later_content() {
        let store = Arc::new(MemoryStore::new());
        let ctx = SyncContext {
            store: store.clone(),
            http: reqwest::Client::new(),
            locks: Arc::new(PathLocks::new()),
            endpoints: Endpoints::default(),
            concurrency: 1,
        };
        let container = Container::candidate("quay.io", "ns", "tool");
        store.save_container(&container).await.unwrap();
        let mut tag = Tag::new("latest");
        store.save_tag(container.id, &tag).await.unwrap();

        let mut fresh = Tag::new("latest");
        fresh.source_files = vec![
            SourceFile::new(FileType::Dockerfile, "FROM ubuntu:14.04\n".into()),
            SourceFile::new(FileType::Dockerfile, "FROM ubuntu:16.04\n".into()),
        ];
        merge_files(&ctx, &mut tag, &fresh).await.unwrap();

        assert_eq!(tag.source_files.len(), 1);
        let stored = store.find_container(container.id).await.unwrap().unwrap();
        let files = &stored.tags[0].source_files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "FROM ubuntu:16.04\n");
    }
}
