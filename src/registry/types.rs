use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{Container, Tag};

// ---------------------------------------------------------------------------
// GET /user/
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
pub struct Organization {
    pub name: String,
}

// ---------------------------------------------------------------------------
// GET /repository?namespace=X
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RepositoryList {
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryEntry {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_starred: bool,
}

impl RepositoryEntry {
    pub fn into_candidate(self, registry: &str) -> Container {
        let mut container = Container::candidate(registry, &self.namespace, &self.name);
        container.description = self.description;
        container.is_public = self.is_public;
        container.is_starred = self.is_starred;
        container
    }
}

// ---------------------------------------------------------------------------
// GET /repository/{ns}/{name}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RepositoryDetail {
    #[serde(default)]
    pub tags: BTreeMap<String, TagEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TagEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub manifest_digest: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl RepositoryDetail {
    /// Tags carry registry metadata only; reference and files are filled in by
    /// build correlation.
    pub fn into_tags(self) -> Vec<Tag> {
        self.tags
            .into_iter()
            .map(|(key, entry)| {
                let mut tag = Tag::new(entry.name.unwrap_or(key));
                tag.image_id = entry.image_id;
                tag.manifest_digest = entry.manifest_digest;
                tag.size = entry.size;
                tag.last_modified = entry.last_modified;
                tag
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// GET /repository/{ns}/{name}/build/
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BuildList {
    #[serde(default)]
    pub builds: Vec<Build>,
}

/// A registry build event. Builds are listed most recent first.
#[derive(Debug, Clone, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub trigger_metadata: Option<TriggerMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerMetadata {
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

impl Build {
    pub fn git_url(&self) -> Option<&str> {
        self.trigger_metadata
            .as_ref()
            .and_then(|m| m.git_url.as_deref())
            .filter(|u| !u.is_empty())
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.trigger_metadata
            .as_ref()
            .and_then(|m| m.git_ref.as_deref())
    }

    pub fn produced(&self, tag_name: &str) -> bool {
        self.tags.iter().any(|t| t == tag_name)
    }

    /// `started` parsed as `EEE, d MMM yyyy HH:mm:ss Z`. `None` when absent or
    /// malformed.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started.as_deref().and_then(parse_build_time)
    }
}

pub fn parse_build_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
