//! Read-only access to the git repositories that back registry builds.

pub mod bitbucket;
pub mod github;

use async_trait::async_trait;

use crate::config::Endpoints;

pub use bitbucket::BitbucketRepo;
pub use github::GithubRepo;

#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("reference could not be resolved")]
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResponse {
    pub content: String,
}

#[async_trait]
pub trait SourceCodeRepo: Send + Sync {
    /// The repository's default branch, or `None` when it cannot be determined.
    async fn default_branch(&self) -> Option<String>;

    /// Read `name` at `reference`. A missing file is `Ok(None)`.
    async fn read_file(&self, name: &str, reference: &str)
    -> Result<Option<FileResponse>, ScmError>;

    /// Turn a build's git ref into something `read_file` accepts.
    async fn resolve_reference(&self, raw: Option<&str>) -> Option<String> {
        match raw {
            None => self.default_branch().await,
            Some(raw) => Some(strip_ref(raw).to_owned()),
        }
    }
}

fn strip_ref(raw: &str) -> &str {
    raw.strip_prefix("refs/heads/")
        .or_else(|| raw.strip_prefix("refs/tags/"))
        .unwrap_or(raw)
}

/// Resolve `raw_ref` and read `name`. `Ok(None)` means the file is known to
/// be absent; any failure to find out is an error.
pub async fn try_read_at(
    repo: &dyn SourceCodeRepo,
    name: &str,
    raw_ref: Option<&str>,
) -> Result<Option<FileResponse>, ScmError> {
    let reference = repo
        .resolve_reference(raw_ref)
        .await
        .ok_or(ScmError::Unresolved)?;
    repo.read_file(name, &reference).await
}

/// Like [`try_read_at`], logging any failure as a missing file.
#[tracing::instrument(skip(repo))]
pub async fn read_at(
    repo: &dyn SourceCodeRepo,
    name: &str,
    raw_ref: Option<&str>,
) -> Option<FileResponse> {
    match try_read_at(repo, name, raw_ref).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(error = %e, "source file read failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Git URLs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl GitUrl {
    /// Accepts `git@host:owner/repo.git`, `https://host/owner/repo(.git)` and
    /// `ssh://git@host/owner/repo.git`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (host, path) = if let Some(rest) = raw.strip_prefix("git@") {
            rest.split_once(':')?
        } else {
            let parsed = url::Url::parse(raw).ok()?;
            if !matches!(parsed.scheme(), "https" | "http" | "ssh" | "git") {
                return None;
            }
            let host = parsed.host_str()?.to_owned();
            let path = parsed.path().trim_start_matches('/').to_owned();
            return Self::from_parts(&host, &path);
        };
        Self::from_parts(host, path)
    }

    fn from_parts(host: &str, path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let (owner, repo) = path.split_once('/')?;
        if host.is_empty() || owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self {
            host: host.to_ascii_lowercase(),
            owner: owner.to_owned(),
            repo: repo.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Provider credentials for one refresh cycle.
#[derive(Clone)]
pub struct ScmFactory {
    http: reqwest::Client,
    endpoints: Endpoints,
    github_token: String,
    bitbucket_token: Option<String>,
}

impl ScmFactory {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        github_token: String,
        bitbucket_token: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoints,
            github_token,
            bitbucket_token,
        }
    }

    /// Pick the adapter for a container's git URL. `None` for an empty or
    /// unparsable URL, an unknown host, or Bitbucket without a token.
    pub fn for_git_url(&self, git_url: Option<&str>) -> Option<Box<dyn SourceCodeRepo>> {
        let raw = git_url.filter(|u| !u.trim().is_empty())?;
        let Some(url) = GitUrl::parse(raw) else {
            tracing::debug!(git_url = raw, "unparsable git url");
            return None;
        };

        match url.host.as_str() {
            "github.com" => Some(Box::new(GithubRepo::new(
                self.http.clone(),
                &self.endpoints.github_api,
                &self.github_token,
                url,
            ))),
            "bitbucket.org" => {
                let Some(token) = &self.bitbucket_token else {
                    tracing::debug!(git_url = raw, "bitbucket repository but no bitbucket token");
                    return None;
                };
                Some(Box::new(BitbucketRepo::new(
                    self.http.clone(),
                    &self.endpoints.bitbucket_api,
                    token,
                    url,
                )))
            }
            other => {
                tracing::debug!(host = other, "no source control adapter for host");
                None
            }
        }
    }
}
