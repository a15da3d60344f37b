//! Domain model types used throughout kfed.
//!
//! These types bridge the configuration document, the sync manager, the
//! knowledge merger and the CLI/daemon front ends.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest priority a source may carry. Local knowledge is injected with it.
pub const MAX_PRIORITY: u16 = 999;

// ---------------------------------------------------------------------------
// Source descriptors
// ---------------------------------------------------------------------------

/// One configured knowledge origin.
///
/// The `name` is the key of the `sources` map in the configuration document
/// and is filled in after deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    #[serde(skip)]
    pub name: String,

    /// Kind-specific payload, tagged by `kind`.
    #[serde(flatten)]
    pub kind: SourceKind,

    /// Explicit cache directory. Defaults to `<cache_root>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_cache: Option<PathBuf>,

    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// 0..=999, higher wins conflicts.
    #[serde(default)]
    pub priority: u16,

    #[serde(default, skip_serializing_if = "SourceFilters::is_empty")]
    pub filters: SourceFilters,
}

/// Kind-specific source payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// A remote git repository cloned into the cache.
    Repository(RepositorySource),
    /// A database snapshot written into the cache by an external query runner.
    Database(DatabaseSource),
    /// A web snapshot written into the cache by an external fetcher.
    Web(WebSource),
}

/// Remote git repository settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositorySource {
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

fn default_branch() -> String {
    "main".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSource {
    /// Environment variable holding the connection string.
    pub connection_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSource {
    pub url: String,
}

/// Credential descriptor for a repository source.
///
/// Secrets are referenced through `_env` fields; the resolved values are
/// populated by [`crate::config::FederationConfig::resolve_env_vars`] and
/// never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Credentials come from the ambient SSH agent.
    Ssh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    /// Personal access / OAuth token embedded in the HTTPS URL.
    Token {
        token_env: String,

        /// Forces the URL convention instead of guessing from the host.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_style: Option<HostStyle>,

        #[serde(skip)]
        token: Option<String>,
    },
    /// Username and password embedded in the HTTPS URL.
    Basic {
        username: String,
        password_env: String,

        #[serde(skip)]
        password: Option<String>,
    },
}

/// Host-specific convention for embedding a token in a remote URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostStyle {
    /// `https://<token>@host/...`
    Github,
    /// `https://oauth2:<token>@host/...`
    Gitlab,
}

/// Include / exclude globs evaluated against source-relative paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl SourceFilters {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// How often a source's cache is refreshed automatically.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    #[default]
    Daily,
    Weekly,
    OnDemand,
    Manual,
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::OnDemand => write!(f, "on_demand"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for SyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "on_demand" | "on-demand" => Ok(Self::OnDemand),
            "manual" => Ok(Self::Manual),
            other => Err(format!(
                "unknown sync policy '{}': expected daily, weekly, on_demand or manual",
                other
            )),
        }
    }
}

impl SourceDescriptor {
    /// Create a repository source with default policy, branch and priority.
    pub fn repository(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Repository(RepositorySource {
                url: url.into(),
                branch: default_branch(),
                auth: None,
            }),
            local_cache: None,
            sync_policy: SyncPolicy::default(),
            priority: 0,
            filters: SourceFilters::default(),
        }
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_cache = Some(path.into());
        self
    }

    /// Short label for the source kind.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            SourceKind::Repository(_) => "repository",
            SourceKind::Database(_) => "database",
            SourceKind::Web(_) => "web",
        }
    }

    /// The remote location this source is read from.
    pub fn location(&self) -> &str {
        match &self.kind {
            SourceKind::Repository(repo) => &repo.url,
            SourceKind::Database(db) => &db.connection_env,
            SourceKind::Web(web) => &web.url,
        }
    }

    /// Repository payload, if this is a repository source.
    pub fn as_repository(&self) -> Option<&RepositorySource> {
        match &self.kind {
            SourceKind::Repository(repo) => Some(repo),
            SourceKind::Database(_) | SourceKind::Web(_) => None,
        }
    }

    /// Effective cache directory under `cache_root`.
    pub fn cache_path(&self, cache_root: &Path) -> PathBuf {
        match &self.local_cache {
            Some(path) => crate::config::expand_tilde(path),
            None => cache_root.join(&self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync results
// ---------------------------------------------------------------------------

/// The git operation a successful sync performed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Clone,
    Pull,
    ResetAndPull,
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clone => write!(f, "clone"),
            Self::Pull => write!(f, "pull"),
            Self::ResetAndPull => write!(f, "reset_and_pull"),
        }
    }
}

/// Tri-state outcome of one sync request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success {
        operation: SyncOperation,
        commit: Option<CommitInfo>,
        /// Set when the sync discarded local state of the cache.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    /// Another sync for the same location and cache path is in flight.
    InProgress,
    Error {
        detail: String,
    },
}

/// Result of a sync request for one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    pub fn new(source: impl Into<String>, outcome: SyncOutcome) -> Self {
        Self {
            source: source.into(),
            outcome,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Error { .. })
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.outcome, SyncOutcome::InProgress)
    }

    /// `success`, `in_progress` or `error`.
    pub fn status_label(&self) -> &'static str {
        match self.outcome {
            SyncOutcome::Success { .. } => "success",
            SyncOutcome::InProgress => "in_progress",
            SyncOutcome::Error { .. } => "error",
        }
    }
}

/// Aggregate result of a batch sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSyncReport {
    pub results: Vec<SyncResult>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub in_progress: usize,
}

impl BatchSyncReport {
    pub fn from_results(results: Vec<SyncResult>) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        let failed = results.iter().filter(|r| r.is_error()).count();
        let in_progress = results.iter().filter(|r| r.is_in_progress()).count();
        Self {
            total: results.len(),
            successful,
            failed,
            in_progress,
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.in_progress == 0
    }
}

// ---------------------------------------------------------------------------
// Repository inspection
// ---------------------------------------------------------------------------

/// Information about a single commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: i64,
}

/// A configured remote of a working tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteInfo {
    pub name: String,
    pub url: String,
}

/// Working-tree state as reported by the version-control capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkingTreeStatus {
    pub branch: Option<String>,
    pub ahead: usize,
    pub behind: usize,
    pub modified: Vec<String>,
    pub staged: Vec<String>,
}

/// Read-only status of a source cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepoStatus {
    NotCloned,
    InvalidRepo,
    Ready(RepoDetails),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoDetails {
    pub branch: Option<String>,
    pub ahead: usize,
    pub behind: usize,
    pub modified: Vec<String>,
    pub staged: Vec<String>,
    pub latest_commit: Option<CommitInfo>,
    pub remotes: Vec<RemoteInfo>,
}

impl std::fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotCloned => write!(f, "not_cloned"),
            Self::InvalidRepo => write!(f, "invalid_repo"),
            Self::Ready(_) => write!(f, "ready"),
        }
    }
}
