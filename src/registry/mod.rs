//! Quay registry client. Every call fails soft: network, status and decode
//! failures are logged and reported as "no data" so a refresh can continue.

pub mod types;

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;

use crate::model::{Container, Tag, Token, TokenSource};
pub use types::{Build, BuildList, RepositoryDetail, RepositoryList, UserInfo};

/// Registry name stored on every container mirrored from Quay.
pub const REGISTRY: &str = TokenSource::QuayIo.as_str();

#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    username: Option<String>,
}

impl RegistryClient {
    /// `api_url` must end with `/`.
    pub fn new(http: reqwest::Client, api_url: &str, token: &Token) -> Self {
        Self {
            http,
            api_url: api_url.to_owned(),
            token: token.content.clone(),
            username: token.username.clone(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Option<T> {
        let url = format!("{}{path}", self.api_url);
        let resp = match self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(%url, error = %e, "registry request failed");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "registry returned error status");
            return None;
        }

        match resp.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(%url, error = %e, "registry response could not be decoded");
                None
            }
        }
    }

    /// The token's own namespace plus every organization it belongs to.
    #[tracing::instrument(skip(self))]
    pub async fn list_namespaces(&self) -> BTreeSet<String> {
        let mut namespaces = BTreeSet::new();
        if let Some(name) = &self.username {
            namespaces.insert(name.clone());
        }

        if let Some(info) = self.get_json::<UserInfo>("user/", &[]).await {
            if self.username.is_none()
                && let Some(name) = info.username
            {
                namespaces.insert(name);
            }
            namespaces.extend(info.organizations.into_iter().map(|o| o.name));
        }

        tracing::debug!(count = namespaces.len(), "namespaces resolved");
        namespaces
    }

    #[tracing::instrument(skip(self, namespaces), fields(namespaces = namespaces.len()))]
    pub async fn list_repositories(&self, namespaces: &BTreeSet<String>) -> Vec<Container> {
        let mut containers = Vec::new();
        for namespace in namespaces {
            let Some(list) = self
                .get_json::<RepositoryList>("repository", &[("namespace", namespace.as_str())])
                .await
            else {
                continue;
            };
            containers.extend(
                list.repositories
                    .into_iter()
                    .map(|entry| entry.into_candidate(REGISTRY)),
            );
        }
        tracing::debug!(count = containers.len(), "repositories listed");
        containers
    }

    /// Build history for `namespace/name`, most recent first.
    #[tracing::instrument(skip(self))]
    pub async fn list_builds(&self, repository: &str) -> Option<Vec<Build>> {
        self.get_json::<BuildList>(&format!("repository/{repository}/build/"), &[])
            .await
            .map(|list| list.builds)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_tags(&self, repository: &str) -> Option<Vec<Tag>> {
        self.get_json::<RepositoryDetail>(&format!("repository/{repository}"), &[])
            .await
            .map(RepositoryDetail::into_tags)
    }
}
