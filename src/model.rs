use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Token sources
// ---------------------------------------------------------------------------

/// External provider a stored OAuth token belongs to. Must match the `source`
/// column of the `tokens` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenSource {
    #[serde(rename = "quay.io")]
    QuayIo,
    #[serde(rename = "github.com")]
    GithubCom,
    #[serde(rename = "bitbucket.org")]
    BitbucketOrg,
}

impl TokenSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuayIo => "quay.io",
            Self::GithubCom => "github.com",
            Self::BitbucketOrg => "bitbucket.org",
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quay.io" => Ok(Self::QuayIo),
            "github.com" => Ok(Self::GithubCom),
            "bitbucket.org" => Ok(Self::BitbucketOrg),
            other => Err(anyhow::anyhow!("unknown token source: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Users and tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
}

/// Per-user OAuth credential for one provider. Exactly one per `(user, source)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: TokenSource,
    pub content: String,
    pub refresh_token: Option<String>,
    /// Account name on the provider. For Quay this is the user's own namespace.
    pub username: Option<String>,
}

// ---------------------------------------------------------------------------
// Source files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    /// Tool descriptor read from `Dockstore.cwl`.
    DockstoreCwl,
    /// Container build instructions read from `Dockerfile`.
    Dockerfile,
}

impl FileType {
    pub const ALL: [Self; 2] = [Self::DockstoreCwl, Self::Dockerfile];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DockstoreCwl => "DOCKSTORE_CWL",
            Self::Dockerfile => "DOCKERFILE",
        }
    }

    /// Well-known file name read from the git repository for this type.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::DockstoreCwl => "Dockstore.cwl",
            Self::Dockerfile => "Dockerfile",
        }
    }
}

impl FromStr for FileType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOCKSTORE_CWL" => Ok(Self::DockstoreCwl),
            "DOCKERFILE" => Ok(Self::Dockerfile),
            other => Err(anyhow::anyhow!("unknown file type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub id: Uuid,
    pub file_type: FileType,
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(file_type: FileType, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_type,
            path: file_type.file_name().to_owned(),
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub reference: Option<String>,
    pub automated: bool,
    pub image_id: Option<String>,
    pub manifest_digest: Option<String>,
    pub size: Option<i64>,
    pub last_modified: Option<String>,
    pub source_files: Vec<SourceFile>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            reference: None,
            automated: false,
            image_id: None,
            manifest_digest: None,
            size: None,
            last_modified: None,
            source_files: Vec::new(),
        }
    }

    /// Copy the fresh tag's mutable fields onto `self`, keeping identity and files.
    pub fn merge_from(&mut self, fresh: &Tag) -> FieldChanges {
        let mut changes = FieldChanges::default();
        changes.set(&mut self.reference, &fresh.reference, "reference");
        changes.set(&mut self.automated, &fresh.automated, "automated");
        changes.set(&mut self.image_id, &fresh.image_id, "image_id");
        changes.set(&mut self.manifest_digest, &fresh.manifest_digest, "manifest_digest");
        changes.set(&mut self.size, &fresh.size, "size");
        changes.set(&mut self.last_modified, &fresh.last_modified, "last_modified");
        changes
    }

    pub fn file(&self, file_type: FileType) -> Option<&SourceFile> {
        self.source_files.iter().find(|f| f.file_type == file_type)
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub id: Uuid,
    pub registry: String,
    pub namespace: String,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub is_starred: bool,
    pub git_url: Option<String>,
    pub has_descriptor: bool,
    pub last_build: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub tags: Vec<Tag>,
}

impl Container {
    /// A freshly fetched container that has not been matched against the store yet.
    pub fn candidate(registry: &str, namespace: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry: registry.to_owned(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            path: container_path(registry, namespace, name),
            description: None,
            is_public: false,
            is_starred: false,
            git_url: None,
            has_descriptor: false,
            last_build: None,
            last_updated: None,
            tags: Vec::new(),
        }
    }

    /// `namespace/name`, the repository coordinate the registry API uses.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Exact, case-sensitive identity comparison.
    pub fn same_identity(&self, other: &Container) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.registry == other.registry
    }

    /// Copy the fresh container's mutable fields onto `self`. Identity (`id`,
    /// `path`) is never replaced. Fields `observed` marks as unknown keep their
    /// stored values, and so does an unparsable build time.
    pub fn merge_from(&mut self, fresh: &Container, observed: Observed) -> FieldChanges {
        let mut changes = FieldChanges::default();
        changes.set(&mut self.registry, &fresh.registry, "registry");
        changes.set(&mut self.description, &fresh.description, "description");
        changes.set(&mut self.is_public, &fresh.is_public, "is_public");
        changes.set(&mut self.is_starred, &fresh.is_starred, "is_starred");
        if observed.descriptor {
            changes.set(&mut self.has_descriptor, &fresh.has_descriptor, "has_descriptor");
        }
        if observed.builds {
            changes.set(&mut self.git_url, &fresh.git_url, "git_url");
        }
        if fresh.last_build.is_some() {
            changes.set(&mut self.last_build, &fresh.last_build, "last_build");
        }
        changes
    }
}

/// Which remote-derived fields of a fresh container were actually reported.
/// A failed lookup leaves its flag unset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    /// The build history was listed; `git_url` follows the latest build.
    pub builds: bool,
    /// The descriptor probe got a definite answer.
    pub descriptor: bool,
}

impl Observed {
    pub const ALL: Self = Self {
        builds: true,
        descriptor: true,
    };
}

pub fn container_path(registry: &str, namespace: &str, name: &str) -> String {
    format!("{registry}/{namespace}/{name}")
}

/// Split `registry/namespace/name` into its parts. The name may not contain `/`.
pub fn split_path(path: &str) -> Option<(&str, &str, &str)> {
    let mut parts = path.splitn(3, '/');
    let registry = parts.next().filter(|s| !s.is_empty())?;
    let namespace = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
    Some((registry, namespace, name))
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

/// Names of the fields a merge actually modified.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldChanges(Vec<&'static str>);

impl FieldChanges {
    fn set<T: PartialEq + Clone>(&mut self, slot: &mut T, fresh: &T, field: &'static str) {
        if slot != fresh {
            slot.clone_from(fresh);
            self.0.push(field);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(&field)
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.0
    }
}
