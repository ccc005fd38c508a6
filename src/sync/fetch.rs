use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::SyncError;
use crate::model::{Container, FileType, Observed, SourceFile, Tag};
use crate::registry::{Build, RegistryClient};
use crate::scm::{self, ScmFactory, SourceCodeRepo};

/// A registry container with its build-derived fields filled in, waiting for
/// tag correlation.
#[derive(Debug)]
pub struct Built {
    pub container: Container,
    pub builds: Option<Vec<Build>>,
    pub observed: Observed,
}

/// Fully fetched remote state for one container. `tags` is `None` when the
/// registry tag listing failed.
#[derive(Debug)]
pub struct Fetched {
    pub container: Container,
    pub tags: Option<Vec<Tag>>,
    pub observed: Observed,
}

/// Run `work` over `items` on at most `limit` concurrent tasks. Output order
/// follows input order.
async fn bounded<I, R, F, Fut>(limit: usize, items: Vec<I>, work: F) -> Result<Vec<R>, SyncError>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    for (idx, item) in items.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let fut = work(item);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (idx, fut.await)
        });
    }

    let mut out = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => out.push(result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // A dropped worker would make its container look orphaned.
            Err(_) => return Err(SyncError::Cancelled),
        }
    }
    out.sort_by_key(|(idx, _)| *idx);
    Ok(out.into_iter().map(|(_, r)| r).collect())
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

pub async fn builds(
    limit: usize,
    registry: &RegistryClient,
    scm: &ScmFactory,
    candidates: Vec<Container>,
) -> Result<Vec<Built>, SyncError> {
    bounded(limit, candidates, |container| {
        let registry = registry.clone();
        let scm = scm.clone();
        async move { fetch_builds(&registry, &scm, container).await }
    })
    .await
}

#[tracing::instrument(skip_all, fields(path = %container.path))]
async fn fetch_builds(registry: &RegistryClient, scm: &ScmFactory, mut container: Container) -> Built {
    let builds = registry.list_builds(&container.repository()).await;
    let mut observed = Observed {
        builds: builds.is_some(),
        descriptor: false,
    };

    match builds.as_deref().and_then(<[Build]>::first) {
        Some(latest) => {
            container.git_url = latest.git_url().map(str::to_owned);
            container.last_build = latest.started_at();
            if container.last_build.is_none() {
                tracing::info!(
                    started = latest.started.as_deref(),
                    "build date did not match 'EEE, d MMM yyyy HH:mm:ss Z'"
                );
            }
        }
        None => tracing::debug!("no build history"),
    }

    match scm.for_git_url(container.git_url.as_deref()) {
        Some(repo) => {
            match scm::try_read_at(repo.as_ref(), FileType::DockstoreCwl.file_name(), None).await {
                Ok(file) => {
                    container.has_descriptor = file.is_some();
                    observed.descriptor = true;
                }
                Err(e) => tracing::warn!(error = %e, "descriptor probe failed, keeping stored flag"),
            }
        }
        // Build history without a git URL: nothing to describe.
        None if observed.builds && container.git_url.is_none() => observed.descriptor = true,
        None => {}
    }

    Built {
        container,
        builds,
        observed,
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub async fn tags(
    limit: usize,
    registry: &RegistryClient,
    scm: &ScmFactory,
    built: Vec<Built>,
) -> Result<Vec<Fetched>, SyncError> {
    bounded(limit, built, |built| {
        let registry = registry.clone();
        let scm = scm.clone();
        async move {
            let tags = fetch_tags(&registry, &scm, &built).await;
            Fetched {
                container: built.container,
                tags,
                observed: built.observed,
            }
        }
    })
    .await
}

#[tracing::instrument(skip_all, fields(path = %built.container.path))]
async fn fetch_tags(registry: &RegistryClient, scm: &ScmFactory, built: &Built) -> Option<Vec<Tag>> {
    let Some(mut tags) = registry.list_tags(&built.container.repository()).await else {
        tracing::warn!("tag listing unavailable");
        return None;
    };

    let builds = built.builds.as_deref().unwrap_or_default();
    if builds.is_empty() {
        return Some(tags);
    }

    let repo = scm.for_git_url(built.container.git_url.as_deref());
    for tag in &mut tags {
        let Some(build) = builds.iter().find(|b| b.produced(&tag.name)) else {
            continue;
        };
        correlate(tag, build, repo.as_deref()).await;
    }
    Some(tags)
}

/// Attach the producing build's git ref to `tag` and read its source files at
/// that ref.
async fn correlate(tag: &mut Tag, build: &Build, repo: Option<&dyn SourceCodeRepo>) {
    tag.reference = build.git_ref().map(str::to_owned);
    tag.automated = tag.reference.is_some();
    tracing::debug!(tag = %tag.name, build = %build.id, reference = ?tag.reference, "build correlated");

    let Some(repo) = repo else { return };
    for file_type in FileType::ALL {
        if let Some(file) = scm::read_at(repo, file_type.file_name(), tag.reference.as_deref()).await {
            tag.source_files.push(SourceFile::new(file_type, file.content));
        }
    }
}
