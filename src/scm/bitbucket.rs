use async_trait::async_trait;
use serde::Deserialize;

use super::{FileResponse, GitUrl, ScmError, SourceCodeRepo};

/// Bitbucket Cloud 2.0 API. Files come back as raw text.
pub struct BitbucketRepo {
    http: reqwest::Client,
    api_url: String,
    token: String,
    url: GitUrl,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    mainbranch: Option<Branch>,
}

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

impl BitbucketRepo {
    pub fn new(http: reqwest::Client, api_url: &str, token: &str, url: GitUrl) -> Self {
        Self {
            http,
            api_url: api_url.to_owned(),
            token: token.to_owned(),
            url,
        }
    }

    fn repo_url(&self) -> String {
        format!(
            "{}repositories/{}/{}",
            self.api_url, self.url.owner, self.url.repo
        )
    }

    /// `{repo}/src/{reference}/{name}` with the reference as one encoded
    /// segment, so `feature/x` or `#` survive the trip.
    fn file_url(&self, name: &str, reference: &str) -> Result<url::Url, ScmError> {
        let mut url = url::Url::parse(&self.repo_url())
            .map_err(|e| ScmError::Payload(format!("bad repository url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ScmError::Payload("repository url cannot be a base".into()))?
            .pop_if_empty()
            .push("src")
            .push(reference)
            .extend(name.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl SourceCodeRepo for BitbucketRepo {
    #[tracing::instrument(skip(self), fields(owner = %self.url.owner, repo = %self.url.repo))]
    async fn default_branch(&self) -> Option<String> {
        let result = self
            .http
            .get(self.repo_url())
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "bitbucket repository lookup failed");
                return None;
            }
        };
        match resp.json::<RepositoryInfo>().await {
            Ok(info) => info.mainbranch.map(|b| b.name),
            Err(e) => {
                tracing::warn!(error = %e, "bitbucket repository response could not be decoded");
                None
            }
        }
    }

    #[tracing::instrument(skip(self), fields(owner = %self.url.owner, repo = %self.url.repo), err)]
    async fn read_file(
        &self,
        name: &str,
        reference: &str,
    ) -> Result<Option<FileResponse>, ScmError> {
        let url = self.file_url(name, reference)?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("file not present");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ScmError::Status(resp.status().as_u16()));
        }

        let content = resp.text().await?;
        Ok(Some(FileResponse { content }))
    }
}
