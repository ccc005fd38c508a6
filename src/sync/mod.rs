//! Container reconciliation: mirror a user's Quay repositories, their tags and
//! the source files behind each build into the store.

mod error;
pub mod fetch;
pub mod merge;

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Endpoints;
use crate::model::{Container, Token, TokenSource};
use crate::registry::RegistryClient;
use crate::scm::ScmFactory;
use crate::store::{AppState, PathLocks, Store};

pub use error::SyncError;
pub use merge::MergeSummary;

/// Everything a refresh cycle needs, detached from the HTTP layer so the CLI
/// and tests can drive it directly.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn Store>,
    pub http: reqwest::Client,
    pub locks: Arc<PathLocks>,
    pub endpoints: Endpoints,
    pub concurrency: usize,
}

impl SyncContext {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            http: state.http.clone(),
            locks: Arc::clone(&state.locks),
            endpoints: state.config.endpoints.clone(),
            concurrency: state.config.refresh_concurrency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStage {
    Start,
    TokensResolved,
    NamespacesResolved,
    ContainersFetched,
    BuildsFetched,
    TagsCorrelated,
    Merged,
    Done,
    Aborted,
}

impl fmt::Display for RefreshStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::TokensResolved => "tokens_resolved",
            Self::NamespacesResolved => "namespaces_resolved",
            Self::ContainersFetched => "containers_fetched",
            Self::BuildsFetched => "builds_fetched",
            Self::TagsCorrelated => "tags_correlated",
            Self::Merged => "merged",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

fn enter(stage: RefreshStage) {
    tracing::info!(%stage, "refresh stage");
}

/// The credentials a refresh cycle runs with.
#[derive(Debug)]
struct Credentials {
    quay: Token,
    github: Token,
    bitbucket: Option<Token>,
}

impl Credentials {
    fn resolve(tokens: Vec<Token>) -> Result<Self, SyncError> {
        let (mut quay, mut github, mut bitbucket) = (None, None, None);
        for token in tokens {
            match token.source {
                TokenSource::QuayIo => quay = Some(token),
                TokenSource::GithubCom => github = Some(token),
                TokenSource::BitbucketOrg => bitbucket = Some(token),
            }
        }
        let quay = quay.ok_or(SyncError::MissingToken(TokenSource::QuayIo))?;
        let github = github.ok_or(SyncError::MissingToken(TokenSource::GithubCom))?;
        if bitbucket.is_none() {
            tracing::warn!("bitbucket.org token not found, bitbucket repositories will be skipped");
        }
        Ok(Self {
            quay,
            github,
            bitbucket,
        })
    }
}

/// Refresh every container visible to `user_id`'s Quay token and return the
/// user's containers as persisted afterwards.
///
/// Nothing is written when a required token is missing or when `cancel` fires
/// before the merge starts.
#[tracing::instrument(skip(ctx, cancel), err)]
pub async fn refresh(
    ctx: &SyncContext,
    user_id: Uuid,
    cancel: &CancellationToken,
) -> Result<Vec<Container>, SyncError> {
    enter(RefreshStage::Start);
    ctx.store
        .find_user(user_id)
        .await?
        .ok_or(SyncError::UserNotFound(user_id))?;

    let creds = match Credentials::resolve(ctx.store.tokens_for_user(user_id).await?) {
        Ok(creds) => creds,
        Err(e) => {
            enter(RefreshStage::Aborted);
            return Err(e);
        }
    };
    enter(RefreshStage::TokensResolved);

    let registry = RegistryClient::new(ctx.http.clone(), &ctx.endpoints.quay_api, &creds.quay);
    let scm = ScmFactory::new(
        ctx.http.clone(),
        ctx.endpoints.clone(),
        creds.github.content.clone(),
        creds.bitbucket.map(|t| t.content),
    );

    let fetch = async {
        let namespaces = registry.list_namespaces().await;
        enter(RefreshStage::NamespacesResolved);

        let candidates = registry.list_repositories(&namespaces).await;
        enter(RefreshStage::ContainersFetched);

        let built = fetch::builds(ctx.concurrency, &registry, &scm, candidates).await?;
        enter(RefreshStage::BuildsFetched);

        let fetched = fetch::tags(ctx.concurrency, &registry, &scm, built).await?;
        enter(RefreshStage::TagsCorrelated);
        Ok::<_, SyncError>(fetched)
    };

    let fetched = tokio::select! {
        () = cancel.cancelled() => {
            enter(RefreshStage::Aborted);
            return Err(SyncError::Cancelled);
        }
        fetched = fetch => fetched?,
    };

    merge::apply(ctx, user_id, fetched, cancel).await?;
    enter(RefreshStage::Merged);

    let containers = ctx.store.containers_for_user(user_id).await?;
    enter(RefreshStage::Done);
    Ok(containers)
}
