use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use super::{FileResponse, GitUrl, ScmError, SourceCodeRepo};

pub struct GithubRepo {
    http: reqwest::Client,
    api_url: String,
    token: String,
    url: GitUrl,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

impl GithubRepo {
    pub fn new(http: reqwest::Client, api_url: &str, token: &str, url: GitUrl) -> Self {
        Self {
            http,
            api_url: api_url.to_owned(),
            token: token.to_owned(),
            url,
        }
    }

    fn repo_url(&self) -> String {
        format!("{}repos/{}/{}", self.api_url, self.url.owner, self.url.repo)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }
}

fn decode_content(entry: ContentEntry) -> Result<String, ScmError> {
    if entry.encoding.as_deref().is_some_and(|e| e != "base64") {
        return Err(ScmError::Payload(format!(
            "unsupported encoding {:?}",
            entry.encoding
        )));
    }
    // GitHub wraps base64 payloads at 60 columns.
    let compact: String = entry
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| ScmError::Payload(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ScmError::Payload(e.to_string()))
}

#[async_trait]
impl SourceCodeRepo for GithubRepo {
    #[tracing::instrument(skip(self), fields(owner = %self.url.owner, repo = %self.url.repo))]
    async fn default_branch(&self) -> Option<String> {
        let resp = match self.get(&self.repo_url()).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), "github repository lookup failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "github repository lookup failed");
                return None;
            }
        };
        match resp.json::<RepositoryInfo>().await {
            Ok(info) => info.default_branch,
            Err(e) => {
                tracing::warn!(error = %e, "github repository response could not be decoded");
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
        let url = format!("{}/contents/{name}", self.repo_url());
        let resp = self.get(&url).query(&[("ref", reference)]).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("file not present");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ScmError::Status(resp.status().as_u16()));
        }

        let entry: ContentEntry = resp
            .json()
            .await
            .map_err(|e| ScmError::Payload(e.to_string()))?;
        Ok(Some(FileResponse {
            content: decode_content(entry)?,
        }))
    }
}
